//! Calibration transforms the sequencers order but do not look inside.
//!
//! Most detector and image calibrations are represented by
//! [`CalibrationStep`], which records completion and leaves the data alone.
//! Gain scaling, background subtraction and resampling carry a little real
//! behaviour because the sequencers branch on what they produce.

use log::{debug, warn};
use ndarray::ArrayD;

use crate::data::model::{DataModel, ModelKind, StepStatus};
use crate::error::{PipelineError, Result, ShapeError};
use crate::output::OutputManager;
use crate::pipeline::steps::{BKG_SUBTRACT, GAIN_SCALE, RESAMPLE};

use super::{BackgroundSubtraction, StepSettings, Transform};

// ---------------------------------------------------------------------------
// Marker step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CalibrationStep {
    name: String,
    settings: StepSettings,
}

impl CalibrationStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: StepSettings::new(),
        }
    }
}

impl Transform for CalibrationStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, mut input: DataModel, _outputs: &mut OutputManager) -> Result<DataModel> {
        input.mark_step(&self.name, StepStatus::Complete);
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// Gain scale
// ---------------------------------------------------------------------------

/// Rescale data taken with a non-standard gain by the exposure's gain factor.
#[derive(Debug, Clone, Default)]
pub struct GainScaleStep {
    settings: StepSettings,
}

impl GainScaleStep {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for GainScaleStep {
    fn name(&self) -> &str {
        GAIN_SCALE
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, mut input: DataModel, _outputs: &mut OutputManager) -> Result<DataModel> {
        let factor = input.meta.gain_factor;
        if factor == 1.0 {
            debug!("Gain factor is 1; data left as is");
        } else {
            input.data.mapv_inplace(|v| v * factor);
        }
        input.mark_step(GAIN_SCALE, StepStatus::Complete);
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// Background subtraction
// ---------------------------------------------------------------------------

/// Subtract the average of the background exposures from the science data.
#[derive(Debug, Clone, Default)]
pub struct BackgroundStep {
    settings: StepSettings,
}

impl BackgroundStep {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for BackgroundStep {
    fn name(&self) -> &str {
        BKG_SUBTRACT
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, _input: DataModel, _outputs: &mut OutputManager) -> Result<DataModel> {
        Err(PipelineError::Step {
            step: BKG_SUBTRACT.to_string(),
            reason: "needs background exposures".to_string(),
        })
    }

    fn as_background(&mut self) -> Option<&mut dyn BackgroundSubtraction> {
        Some(self)
    }
}

impl BackgroundSubtraction for BackgroundStep {
    fn subtract(
        &mut self,
        mut input: DataModel,
        backgrounds: &[DataModel],
        _outputs: &mut OutputManager,
    ) -> Result<DataModel> {
        if backgrounds.is_empty() {
            warn!("No background exposures given; nothing subtracted");
            input.mark_step(BKG_SUBTRACT, StepStatus::Skipped);
            return Ok(input);
        }

        let mut sum = ArrayD::<f32>::zeros(input.data.raw_dim());
        for bkg in backgrounds {
            if bkg.data.shape() != input.data.shape() {
                return Err(ShapeError::Mismatch {
                    expected: input.data.shape().to_vec(),
                    found: bkg.data.shape().to_vec(),
                }
                .into());
            }
            sum += &bkg.data;
        }
        let mean = sum / backgrounds.len() as f32;
        input.data -= &mean;
        input.mark_step(BKG_SUBTRACT, StepStatus::Complete);
        Ok(input)
    }
}

// ---------------------------------------------------------------------------
// Resample
// ---------------------------------------------------------------------------

/// Produce the resampled (`i2d`) image of a 2-D exposure.
#[derive(Debug, Clone, Default)]
pub struct ResampleStep {
    settings: StepSettings,
}

impl ResampleStep {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for ResampleStep {
    fn name(&self) -> &str {
        RESAMPLE
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, input: DataModel, _outputs: &mut OutputManager) -> Result<DataModel> {
        input.require_kind(ModelKind::Image)?;
        let mut resampled = input;
        resampled.mark_step(RESAMPLE, StepStatus::Complete);
        Ok(resampled)
    }
}
