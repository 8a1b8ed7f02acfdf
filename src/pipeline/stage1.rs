//! Stage 1: detector-level calibration of an uncalibrated ramp, ending in a
//! count-rate image and its per-integration counterpart.

use log::{debug, info, warn};

use crate::data::loader::open_ramp;
use crate::data::model::{DataModel, ExposureRef, Instrument, ModelKind};
use crate::error::Result;
use crate::output::OutputManager;
use crate::step::calibration::{CalibrationStep, GainScaleStep};
use crate::step::config::{apply_config, ConfigStructure};
use crate::step::noise::NoiseCorrectionStep;
use crate::step::ramp_fit::RampFitStep;
use crate::step::{run_ramp_fit, run_step, FitMode, Transform, TransformRegistry};

use super::steps::{
    default_step_list, Stage, StepList, DARK_CURRENT, DQ_INIT, FIRSTFRAME, GAIN_SCALE,
    GROUP_SCALE, IPC, JUMP, LASTFRAME, LINEARITY, NOISE_CORRECTION, PERSISTENCE, RAMP_FIT, REFPIX,
    RESET, RSCD, SATURATION, SUPERBIAS,
};

/// What a Stage 1 run produces.
#[derive(Debug, Clone, Default)]
pub struct Stage1Output {
    /// Exposure-level rate, or the calibrated ramp when fitting was skipped.
    pub primary: Option<DataModel>,
    /// Per-integration rates; only present when the fit ran.
    pub integrations: Option<DataModel>,
}

#[derive(Debug)]
pub struct Stage1Pipeline {
    registry: TransformRegistry,
    outputs: OutputManager,
    /// Save the primary result as `rate` (or `rateints`).
    pub save_results: bool,
    /// Save the ramp as it enters fitting, with suffix `ramp`.
    pub save_calibrated_ramp: bool,
}

impl Default for Stage1Pipeline {
    fn default() -> Self {
        Self::new(OutputManager::default())
    }
}

impl Stage1Pipeline {
    pub fn new(outputs: OutputManager) -> Self {
        Self {
            registry: TransformRegistry::compose(Self::base_steps(), Self::added_steps()),
            outputs,
            save_results: false,
            save_calibrated_ramp: false,
        }
    }

    /// The standard detector steps.
    pub fn base_steps() -> TransformRegistry {
        let mut registry = TransformRegistry::new();
        for name in [
            GROUP_SCALE,
            DQ_INIT,
            SATURATION,
            IPC,
            SUPERBIAS,
            REFPIX,
            LINEARITY,
            PERSISTENCE,
            DARK_CURRENT,
            FIRSTFRAME,
            LASTFRAME,
            RESET,
            RSCD,
            JUMP,
        ] {
            registry.register(name, CalibrationStep::new(name));
        }
        registry
            .with(RAMP_FIT, RampFitStep::new())
            .with(GAIN_SCALE, GainScaleStep::new())
    }

    /// Steps this pipeline adds on top of the standard set.
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

    /// Run the detector steps on one ramp.
    ///
    /// `step_list` defaults to the instrument's standard order. Every name in
    /// it must be registered; this is checked before any step runs.
    pub fn run(
        &mut self,
        input: impl Into<ExposureRef>,
        step_list: Option<StepList>,
        config: Option<&ConfigStructure>,
    ) -> Result<Stage1Output> {
        if let Some(config) = config {
            apply_config(&mut self.registry, config)?;
        }

        let input = input.into();
        info!("Starting Stage 1 on {}", input.display_name());
        let mut ramp = open_ramp(input)?;
        let instrument = ramp.instrument();

        let steps = step_list.unwrap_or_else(|| default_step_list(instrument, Stage::Detector1));
        self.registry.validate(&steps)?;
        debug!("Stage 1 steps for {instrument}: {steps}");

        for name in steps.iter() {
            if name == RAMP_FIT || name == GAIN_SCALE {
                break;
            }
            if name == PERSISTENCE && instrument == Instrument::Nirspec {
                info!("Step {PERSISTENCE} is not run for {instrument} data");
                continue;
            }
            let step = self.registry.require_mut(name)?;
            ramp = run_step(step, ramp, &mut self.outputs)?;
        }

        if self.save_calibrated_ramp {
            self.outputs.save(&ramp, "ramp")?;
        }

        // The fit step's own skip flag decides which outcome to expect.
        let fit_step = self.registry.require_mut(RAMP_FIT)?;
        let mode = if fit_step.settings().skip || !steps.contains(RAMP_FIT) {
            FitMode::Exposure
        } else {
            FitMode::Paired
        };
        let (mut primary, mut integrations) =
            run_ramp_fit(fit_step, ramp, mode, &mut self.outputs)?.into_parts();

        if steps.contains(GAIN_SCALE) {
            let (scaled, scaled_ints) = self.gain_scale(primary, integrations);
            primary = scaled?;
            integrations = scaled_ints?;
        }

        if let Some(ints) = &integrations {
            self.outputs.save(ints, "rateints")?;
        }

        if self.save_results {
            if let Some(primary) = &primary {
                let suffix = if primary.kind == ModelKind::Cube {
                    "rateints"
                } else {
                    "rate"
                };
                self.outputs.save(primary, suffix)?;
            }
        }

        info!("Stage 1 ending");
        Ok(Stage1Output {
            primary,
            integrations,
        })
    }

    /// Apply gain scale to each result on its own, so a failure on one does
    /// not keep the other from being attempted.
    fn gain_scale(
        &mut self,
        primary: Option<DataModel>,
        integrations: Option<DataModel>,
    ) -> (Result<Option<DataModel>>, Result<Option<DataModel>>) {
        let primary = match primary {
            Some(model) => self.scale_one(model, GAIN_SCALE).map(Some),
            None => {
                warn!("Ramp fit produced no exposure-level result; nothing to gain scale");
                Ok(None)
            }
        };
        let integrations = match integrations {
            Some(model) => self.scale_one(model, "gain_scaleints").map(Some),
            None => Ok(None),
        };
        (primary, integrations)
    }

    fn scale_one(&mut self, model: DataModel, suffix: &str) -> Result<DataModel> {
        let step = self.registry.require_mut(GAIN_SCALE)?;
        let previous = step.settings_mut().suffix.replace(suffix.to_string());
        let result = run_step(step, model, &mut self.outputs);
        step.settings_mut().suffix = previous;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{ExposureMeta, ParamValue, StepStatus};
    use ndarray::Array4;

    fn ramp(instrument: Instrument) -> DataModel {
        let data = Array4::from_shape_fn((2, 3, 4, 4), |(_, g, _, _)| g as f32);
        DataModel::ramp(data, ExposureMeta::new(instrument, "NIS_IMAGE").with_filename("jw_uncal.json"))
    }

    fn pipeline() -> Stage1Pipeline {
        Stage1Pipeline::new(OutputManager::detached())
    }

    #[test]
    fn default_run_produces_rate_and_rateints() {
        let mut p = pipeline();
        let out = p.run(ramp(Instrument::Niriss), None, None).unwrap();
        let primary = out.primary.unwrap();
        assert_eq!(primary.kind, ModelKind::Image);
        assert_eq!(primary.step_status(NOISE_CORRECTION), Some(StepStatus::Complete));
        assert_eq!(primary.step_status(GAIN_SCALE), Some(StepStatus::Complete));
        assert_eq!(out.integrations.unwrap().kind, ModelKind::Cube);
        assert_eq!(p.outputs().saved_with_suffix("rateints").count(), 1);
    }

    #[test]
    fn registry_has_noise_step_from_added_set() {
        let p = pipeline();
        assert!(p.registry().contains(NOISE_CORRECTION));
        assert!(p.registry().contains(RAMP_FIT));
    }

    #[test]
    fn skipped_fit_returns_calibrated_ramp() {
        let mut p = pipeline();
        p.step_mut(RAMP_FIT).unwrap().settings_mut().skip = true;
        let out = p.run(ramp(Instrument::Nircam), None, None).unwrap();
        assert!(out.integrations.is_none());
        let primary = out.primary.unwrap();
        assert_eq!(primary.kind, ModelKind::Ramp);
        assert_eq!(primary.step_status(RAMP_FIT), Some(StepStatus::Skipped));
    }

    #[test]
    fn config_is_applied_before_running() {
        let mut config = ConfigStructure::new();
        config
            .entry(IPC.to_string())
            .or_default()
            .insert("skip".into(), ParamValue::Bool(true));
        let mut p = pipeline();
        let out = p.run(ramp(Instrument::Niriss), None, Some(&config)).unwrap();
        assert_eq!(out.primary.unwrap().step_status(IPC), Some(StepStatus::Skipped));
    }

    #[test]
    fn calibrated_ramp_is_saved_on_request() {
        let mut p = pipeline();
        p.save_calibrated_ramp = true;
        p.save_results = true;
        p.run(ramp(Instrument::Niriss), None, None).unwrap();
        let suffixes: Vec<_> = p.outputs().saved().iter().map(|s| s.suffix.as_str()).collect();
        assert!(suffixes.contains(&"ramp"));
        assert!(suffixes.contains(&"rate"));
    }
}
