//! Stage 2: per-exposure imaging calibration of count-rate products.
//!
//! The input is resolved into an [`Association`]; every product in it is
//! processed on its own and the calibrated models are returned in product
//! order.

use log::{debug, info};

use crate::data::filter::{members_by_type, members_of, select_science};
use crate::data::loader::{load_association, open_exposure, AsnInput};
use crate::data::model::{Association, DataModel, ExposureProduct, Instrument};
use crate::error::Result;
use crate::output::{output_name, OutputManager};
use crate::step::calibration::{BackgroundStep, CalibrationStep, ResampleStep};
use crate::step::config::{apply_config, ConfigStructure};
use crate::step::noise::NoiseCorrectionStep;
use crate::step::{run_background, run_step, Transform, TransformRegistry};

use super::steps::{
    default_step_list, Stage, StepList, ASSIGN_WCS, BKG_SUBTRACT, FLAT_FIELD, IMAGE_EXPTYPES,
    NOISE_CORRECTION, PHOTOM, RESAMPLE,
};

#[derive(Debug)]
pub struct Stage2Pipeline {
    registry: TransformRegistry,
    outputs: OutputManager,
    /// Save each calibrated product (`cal` / `calints`) and the resampled
    /// image.
    pub save_results: bool,
    /// Save the background-subtracted exposure.
    pub save_bsub: bool,
    /// Base name for a single loose exposure's product.
    pub output_file: Option<String>,
}

impl Default for Stage2Pipeline {
    fn default() -> Self {
        Self::new(OutputManager::default())
    }
}

impl Stage2Pipeline {
    pub fn new(outputs: OutputManager) -> Self {
        Self {
            registry: TransformRegistry::compose(Self::base_steps(), Self::added_steps()),
            outputs,
            save_results: false,
            save_bsub: false,
            output_file: None,
        }
    }

    pub fn base_steps() -> TransformRegistry {
        TransformRegistry::new()
            .with(BKG_SUBTRACT, BackgroundStep::new())
            .with(ASSIGN_WCS, CalibrationStep::new(ASSIGN_WCS))
            .with(FLAT_FIELD, CalibrationStep::new(FLAT_FIELD))
            .with(PHOTOM, CalibrationStep::new(PHOTOM))
            .with(RESAMPLE, ResampleStep::new())
    }

    pub fn added_steps() -> TransformRegistry {
        TransformRegistry::new().with(NOISE_CORRECTION, NoiseCorrectionStep::new())
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TransformRegistry {
        &mut self.registry
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut (dyn Transform + 'static)> {
        self.registry.get_mut(name)
    }

    pub fn outputs(&self) -> &OutputManager {
        &self.outputs
    }

    /// Calibrate every product of the resolved association.
    ///
    /// A failing product aborts the run; products finished before it have
    /// already been saved when `save_results` is set.
    pub fn run(
        &mut self,
        input: impl Into<AsnInput>,
        step_list: Option<StepList>,
        config: Option<&ConfigStructure>,
    ) -> Result<Vec<DataModel>> {
        if let Some(config) = config {
            apply_config(&mut self.registry, config)?;
        }

        // Stage 2 defaults do not depend on the instrument.
        let steps = step_list.unwrap_or_else(|| default_step_list(Instrument::Nircam, Stage::Image2));
        self.registry.validate(&steps)?;

        let asn = load_association(input.into(), self.output_file.as_deref())?;
        info!(
            "Starting Stage 2 on {} product(s) from {}",
            asn.products.len(),
            asn.table_name()
        );

        let mut results = Vec::with_capacity(asn.products.len());
        for (i, product) in asn.products.iter().enumerate() {
            info!("Processing product {} ({})", i + 1, product.name);
            let model = self.process(&asn, product, &steps)?;
            results.push(model);
        }

        info!("Stage 2 ending");
        Ok(results)
    }

    fn process(&mut self, asn: &Association, product: &ExposureProduct, steps: &StepList) -> Result<DataModel> {
        let members = members_by_type(product);
        let science = select_science(product, &members)?;
        info!("Working on input {} ...", science.display_name());

        let mut model = open_exposure(science)?;
        model.meta.asn.pool_name = Some(asn.asn_pool.clone());
        model.meta.asn.table_name = Some(asn.table_name());

        let backgrounds = members_of(&members, "background");
        if steps.contains(BKG_SUBTRACT) && !backgrounds.is_empty() {
            let backgrounds = backgrounds
                .into_iter()
                .map(open_exposure)
                .collect::<Result<Vec<_>>>()?;
            let suffix = if model.is_cube() { "bsubints" } else { "bsub" };
            let step = self.registry.require_mut(BKG_SUBTRACT)?;
            let settings = step.settings_mut();
            settings.suffix = Some(suffix.to_string());
            if self.save_bsub {
                settings.save_results = true;
            }
            model = run_background(step, model, &backgrounds, &mut self.outputs)?;
        }

        for name in [ASSIGN_WCS, FLAT_FIELD, PHOTOM] {
            if steps.contains(name) {
                model = run_step(self.registry.require_mut(name)?, model, &mut self.outputs)?;
            }
        }

        if steps.contains(RESAMPLE)
            && IMAGE_EXPTYPES.contains(&model.meta.exposure_type.as_str())
            && model.data.ndim() == 2
        {
            let step = self.registry.require_mut(RESAMPLE)?;
            let settings = step.settings_mut();
            settings.suffix = Some("i2d".to_string());
            settings.save_results = self.save_results;
            // The resampled image is a side product; later steps keep
            // working on the unresampled model.
            run_step(step, model.clone(), &mut self.outputs)?;
            debug!("Resampled image of {} produced", product.name);
        }

        if steps.contains(NOISE_CORRECTION) {
            model = run_step(self.registry.require_mut(NOISE_CORRECTION)?, model, &mut self.outputs)?;
        }

        let suffix = if model.is_cube() { "calints" } else { "cal" };
        model.meta.filename = Some(output_name(&product.name, suffix));
        if self.save_results {
            self.outputs.save(&model, suffix)?;
        }
        info!("Finished processing product {}", product.name);
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{ExposureMeta, Member, StepStatus, SINGLETON_TABLE};
    use ndarray::{Array2, Array3};

    fn rate(exptype: &str) -> DataModel {
        DataModel::image(
            Array2::from_elem((4, 4), 5.0),
            ExposureMeta::new(Instrument::Niriss, exptype).with_filename("jw_nis_rate.json"),
        )
    }

    fn pipeline() -> Stage2Pipeline {
        Stage2Pipeline::new(OutputManager::detached())
    }

    #[test]
    fn loose_model_gets_singleton_provenance_and_cal_name() {
        let mut p = pipeline();
        let out = p.run(rate("NIS_IMAGE"), None, None).unwrap();
        assert_eq!(out.len(), 1);
        let cal = &out[0];
        assert_eq!(cal.meta.asn.table_name.as_deref(), Some(SINGLETON_TABLE));
        assert_eq!(cal.meta.asn.pool_name.as_deref(), Some("none"));
        assert_eq!(cal.meta.filename.as_deref(), Some("jw_nis_cal.json"));
        assert_eq!(cal.step_status(PHOTOM), Some(StepStatus::Complete));
    }

    #[test]
    fn cube_product_is_named_calints() {
        let cube = DataModel::cube(
            Array3::zeros((2, 4, 4)),
            ExposureMeta::new(Instrument::Niriss, "NIS_IMAGE").with_filename("jw_nis_rateints.json"),
        );
        let mut p = pipeline();
        let out = p.run(cube, None, None).unwrap();
        assert_eq!(out[0].meta.filename.as_deref(), Some("jw_nis_calints.json"));
        assert_eq!(out[0].step_status(RESAMPLE), None);
    }

    #[test]
    fn background_member_is_subtracted_and_saved_as_bsub() {
        let asn = Association {
            asn_pool: "pool".into(),
            products: vec![ExposureProduct {
                name: "jw_prod".into(),
                members: vec![
                    Member::new("science", rate("NIS_IMAGE")),
                    Member::new("background", rate("NIS_IMAGE")),
                ],
            }],
            filename: Some("/data/jw_asn.json".into()),
        };
        let mut p = pipeline();
        p.save_bsub = true;
        let out = p.run(asn, Some(vec![BKG_SUBTRACT].into()), None).unwrap();
        assert!(out[0].data.iter().all(|&v| v == 0.0));
        assert_eq!(out[0].meta.asn.table_name.as_deref(), Some("jw_asn.json"));
        assert_eq!(p.outputs().saved_with_suffix("bsub").count(), 1);
    }

    #[test]
    fn resample_runs_only_for_image_types() {
        let mut p = pipeline();
        p.save_results = true;
        p.run(rate("NIS_WFSS"), Some(vec![RESAMPLE].into()), None).unwrap();
        assert_eq!(p.outputs().saved_with_suffix("i2d").count(), 0);
        p.run(rate("NIS_IMAGE"), Some(vec![RESAMPLE].into()), None).unwrap();
        assert_eq!(p.outputs().saved_with_suffix("i2d").count(), 1);
    }
}
