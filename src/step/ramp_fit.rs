//! Ramp fitting: collapse the groups of each integration into a count rate.
//!
//! The fit is a two-point slope between the first and last group of every
//! integration. It yields an exposure-level [`ModelKind::Image`] (the mean
//! over integrations) and a per-integration [`ModelKind::Cube`].

use log::warn;
use ndarray::{Array2, Array3, ArrayView4, Axis};

use crate::data::model::{DataModel, StepStatus};
use crate::error::{PipelineError, Result};
use crate::output::OutputManager;
use crate::pipeline::steps::RAMP_FIT;

use super::{RampFit, StepSettings, Transform};

#[derive(Debug, Clone)]
pub struct RampFitStep {
    settings: StepSettings,
}

impl Default for RampFitStep {
    fn default() -> Self {
        Self {
            settings: StepSettings::new().with_param("group_time", 1.0),
        }
    }
}

impl RampFitStep {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_time(&self) -> f32 {
        self.settings.f64_param("group_time").unwrap_or(1.0) as f32
    }

    /// Per-integration slopes and their mean, or `None` when the ramp is too
    /// short to fit.
    fn fit(&self, input: &DataModel) -> Result<Option<(Array2<f32>, Array3<f32>)>> {
        let ramp = input.ramp_view()?;
        let Some(rates) = integration_slopes(ramp, self.group_time()) else {
            warn!(
                "Ramp has {} group(s); at least 2 are needed to fit a slope",
                ramp.len_of(Axis(1))
            );
            return Ok(None);
        };
        Ok(rates
            .mean_axis(Axis(0))
            .map(|mean| (mean, rates)))
    }
}

fn integration_slopes(ramp: ArrayView4<'_, f32>, group_time: f32) -> Option<Array3<f32>> {
    let ngroups = ramp.len_of(Axis(1));
    if ngroups < 2 {
        return None;
    }
    let first = ramp.index_axis(Axis(1), 0);
    let last = ramp.index_axis(Axis(1), ngroups - 1);
    let span = (ngroups - 1) as f32 * group_time;
    Some((&last - &first) / span)
}

impl Transform for RampFitStep {
    fn name(&self) -> &str {
        RAMP_FIT
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, input: DataModel, outputs: &mut OutputManager) -> Result<DataModel> {
        self.fit_exposure(input, outputs)?
            .ok_or_else(|| PipelineError::Step {
                step: RAMP_FIT.to_string(),
                reason: "no usable groups to fit".to_string(),
            })
    }

    fn as_ramp_fit(&mut self) -> Option<&mut dyn RampFit> {
        Some(self)
    }
}

impl RampFit for RampFitStep {
    fn fit_exposure(&mut self, input: DataModel, outputs: &mut OutputManager) -> Result<Option<DataModel>> {
        let (primary, _) = self.fit_paired(input, outputs)?;
        Ok(primary)
    }

    fn fit_paired(
        &mut self,
        input: DataModel,
        _outputs: &mut OutputManager,
    ) -> Result<(Option<DataModel>, Option<DataModel>)> {
        let Some((mean, rates)) = self.fit(&input)? else {
            return Ok((None, None));
        };
        let mut meta = input.meta;
        meta.cal_step.insert(RAMP_FIT.to_string(), StepStatus::Complete);
        let primary = DataModel::image(mean, meta.clone());
        let integrations = DataModel::cube(rates, meta);
        Ok((Some(primary), Some(integrations)))
    }
}
