//! Column ("1/f") noise correction.
//!
//! Readout noise that is correlated along the slow-scan direction shows up
//! as a constant offset per column in every frame. For each frame the step
//! estimates that constant from the unmasked pixels of the column and
//! subtracts it.
//!
//! Ramps are corrected group by group. Inputs that are not ramps get a second
//! chance as generic exposures: cubes are corrected per integration, anything
//! else is handed back untouched with a warning.

use std::path::Path;

use log::{debug, warn};
use ndarray::{Array2, ArrayD, Axis, IxDyn};

use crate::data::loader::open_model;
use crate::data::model::{DataModel, ModelKind, ParamValue, StepStatus};
use crate::error::{Result, ShapeError};
use crate::output::OutputManager;
use crate::pipeline::steps::NOISE_CORRECTION;

use super::{StepSettings, Transform};

const CLIP_SIGMA: f32 = 3.0;

#[derive(Debug, Clone)]
pub struct NoiseCorrectionStep {
    settings: StepSettings,
}

impl Default for NoiseCorrectionStep {
    fn default() -> Self {
        Self {
            settings: StepSettings::new()
                .with_param("outlier_map", ParamValue::Null)
                .with_param("iterative", false)
                .with_param("save_intermediate", false)
                .with_param("intermediate_output_subdir", ParamValue::Null)
                .with_param("mean_per_frame", false),
        }
    }
}

impl NoiseCorrectionStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pixels flagged non-zero in the outlier map are left out of the
    /// column estimate.
    fn load_mask(&self, rows: usize, cols: usize) -> Result<Option<Array2<bool>>> {
        let Some(path) = self.settings.str_param("outlier_map") else {
            return Ok(None);
        };
        let map = open_model(Path::new(path))?;
        map.require_kind(ModelKind::Image)?;
        if map.data.shape() != [rows, cols] {
            return Err(ShapeError::Mismatch {
                expected: vec![rows, cols],
                found: map.data.shape().to_vec(),
            }
            .into());
        }
        let found = map.data.ndim();
        let mask = map
            .data
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|_| ShapeError::WrongRank {
                kind: ModelKind::Image,
                expected: 2,
                found,
            })?
            .mapv(|v| v != 0.0);
        Ok(Some(mask))
    }

    /// Correct every 2-D frame of `data` in place. Returns the column
    /// constants, shaped like `data` without its row axis.
    fn correct_frames(&self, data: &mut ArrayD<f32>) -> Result<ArrayD<f32>> {
        let ndim = data.ndim();
        let rows = data.len_of(Axis(ndim - 2));
        let cols = data.len_of(Axis(ndim - 1));
        let mask = self.load_mask(rows, cols)?;
        let use_mean = self.settings.bool_param("mean_per_frame");
        let iterative = self.settings.bool_param("iterative");

        let mut constants = Vec::with_capacity(data.len() / rows.max(1));
        // Lanes along the row axis are single columns of single frames,
        // visited with the column index varying fastest.
        for (i, mut column) in data.lanes_mut(Axis(ndim - 2)).into_iter().enumerate() {
            let col = i % cols;
            let samples: Vec<f32> = column
                .iter()
                .enumerate()
                .filter(|(row, v)| {
                    v.is_finite() && !mask.as_ref().is_some_and(|m| m[[*row, col]])
                })
                .map(|(_, v)| *v)
                .collect();
            let constant = column_constant(samples, use_mean, iterative);
            column.mapv_inplace(|v| v - constant);
            constants.push(constant);
        }

        let mut shape = data.shape().to_vec();
        shape.remove(ndim - 2);
        let constants = ArrayD::from_shape_vec(IxDyn(&shape), constants).map_err(|_| {
            ShapeError::Mismatch {
                expected: shape.clone(),
                found: vec![data.len() / rows.max(1)],
            }
        })?;
        Ok(constants)
    }

    fn save_constants(&self, input: &DataModel, constants: ArrayD<f32>, outputs: &mut OutputManager) -> Result<()> {
        let kind = match constants.ndim() {
            3 => ModelKind::Cube,
            _ => ModelKind::Image,
        };
        let model = DataModel::new(kind, constants, input.meta.clone())?;
        let base = self
            .settings
            .output_dir
            .clone()
            .unwrap_or_else(|| outputs.output_dir().to_path_buf());
        let dir = match self.settings.str_param("intermediate_output_subdir") {
            Some(subdir) => base.join(subdir),
            None => base,
        };
        outputs.save_in(&model, Some(&dir), "column_constants")?;
        Ok(())
    }
}

/// Robust level of one column: median (or mean), optionally re-estimated
/// once after clipping samples beyond [`CLIP_SIGMA`].
fn column_constant(mut samples: Vec<f32>, use_mean: bool, iterative: bool) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let level = centre(&mut samples, use_mean);
    if !iterative {
        return level;
    }
    let n = samples.len() as f32;
    let sigma = (samples.iter().map(|v| (v - level).powi(2)).sum::<f32>() / n).sqrt();
    if sigma == 0.0 {
        return level;
    }
    let mut kept: Vec<f32> = samples
        .into_iter()
        .filter(|v| (v - level).abs() <= CLIP_SIGMA * sigma)
        .collect();
    if kept.is_empty() {
        return level;
    }
    centre(&mut kept, use_mean)
}

fn centre(samples: &mut [f32], use_mean: bool) -> f32 {
    if use_mean {
        return samples.iter().sum::<f32>() / samples.len() as f32;
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / 2.0
    } else {
        samples[mid]
    }
}

impl Transform for NoiseCorrectionStep {
    fn name(&self) -> &str {
        NOISE_CORRECTION
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, mut input: DataModel, outputs: &mut OutputManager) -> Result<DataModel> {
        if let Err(not_ramp) = input.require_kind(ModelKind::Ramp) {
            debug!("Input is not a ramp ({not_ramp}); opening as a generic exposure");
            input.validate()?;
            if !input.is_cube() {
                warn!("Stage 2 input is not a cube model. Skipping column noise correction.");
                return Ok(input);
            }
        }

        let constants = self.correct_frames(&mut input.data)?;
        if self.settings.bool_param("save_intermediate") {
            self.save_constants(&input, constants, outputs)?;
        }
        input.mark_step(NOISE_CORRECTION, StepStatus::Complete);
        Ok(input)
    }
}
