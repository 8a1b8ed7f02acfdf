//! Transforms: named, configurable, skippable units of work over a
//! [`DataModel`], and the wrappers sequencers use to invoke them.
//!
//! ```text
//!   ConfigStructure ──apply_config──▶ TransformRegistry ──get_mut(name)──▶ dyn Transform
//!                                                                            │
//!                                        run_step / run_ramp_fit / run_background
//! ```
//!
//! The wrappers own the behaviour common to every step: a skipped step is
//! still invoked, records `SKIPPED` and hands its input back untouched; a step
//! with `save_results` set writes its output through the [`OutputManager`].

pub mod calibration;
pub mod config;
pub mod noise;
pub mod ramp_fit;
pub mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::info;

use crate::data::model::{DataModel, ParamValue, StepStatus};
use crate::error::{PipelineError, Result};
use crate::output::OutputManager;

pub use registry::TransformRegistry;

// ---------------------------------------------------------------------------
// Step settings
// ---------------------------------------------------------------------------

/// Declared type of a step-specific parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Integer,
    /// Accepts integers too.
    Float,
    /// String or null.
    OptionalString,
}

impl ParamKind {
    fn coerce(self, value: &ParamValue) -> Option<ParamValue> {
        match (self, value) {
            (ParamKind::Bool, ParamValue::Bool(_))
            | (ParamKind::Integer, ParamValue::Integer(_))
            | (ParamKind::Float, ParamValue::Float(_))
            | (ParamKind::OptionalString, ParamValue::String(_))
            | (ParamKind::OptionalString, ParamValue::Null) => Some(value.clone()),
            (ParamKind::Float, ParamValue::Integer(i)) => Some(ParamValue::Float(*i as f64)),
            _ => None,
        }
    }

    fn of(value: &ParamValue) -> Self {
        match value {
            ParamValue::Bool(_) => ParamKind::Bool,
            ParamValue::Integer(_) => ParamKind::Integer,
            ParamValue::Float(_) => ParamKind::Float,
            ParamValue::String(_) | ParamValue::Null => ParamKind::OptionalString,
        }
    }
}

/// Flags every step carries, plus its declared parameters.
#[derive(Debug, Clone, Default)]
pub struct StepSettings {
    pub skip: bool,
    pub save_results: bool,
    /// Output suffix; the step name when unset.
    pub suffix: Option<String>,
    /// Where saved results go instead of the pipeline's output directory.
    /// Relative paths resolve against the working directory.
    pub output_dir: Option<PathBuf>,
    params: BTreeMap<String, (ParamKind, ParamValue)>,
}

impl StepSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter; its type is taken from the default value.
    pub fn with_param(mut self, key: &str, default: impl Into<ParamValue>) -> Self {
        let default = default.into();
        self.params
            .insert(key.to_string(), (ParamKind::of(&default), default));
        self
    }

    /// Current value of a common flag or declared parameter.
    pub fn parameter(&self, key: &str) -> Option<ParamValue> {
        match key {
            "skip" => Some(ParamValue::Bool(self.skip)),
            "save_results" => Some(ParamValue::Bool(self.save_results)),
            "suffix" => Some(
                self.suffix
                    .clone()
                    .map_or(ParamValue::Null, ParamValue::String),
            ),
            "output_dir" => Some(
                self.output_dir
                    .as_ref()
                    .map_or(ParamValue::Null, |p| ParamValue::String(p.display().to_string())),
            ),
            _ => self.params.get(key).map(|(_, v)| v.clone()),
        }
    }

    /// Set a flag or parameter. Returns `Ok(false)` for keys the step does
    /// not know.
    pub fn set(&mut self, step: &str, key: &str, value: &ParamValue) -> Result<bool> {
        let invalid = |expected: &str| PipelineError::InvalidParameter {
            step: step.to_string(),
            key: key.to_string(),
            reason: format!("expected {expected}, got {}", value.type_name()),
        };
        match key {
            "skip" => self.skip = value.as_bool().ok_or_else(|| invalid("bool"))?,
            "save_results" => self.save_results = value.as_bool().ok_or_else(|| invalid("bool"))?,
            "suffix" => {
                self.suffix = match value {
                    ParamValue::Null => None,
                    ParamValue::String(s) => Some(s.clone()),
                    _ => return Err(invalid("string")),
                }
            }
            "output_dir" => {
                self.output_dir = match value {
                    ParamValue::Null => None,
                    ParamValue::String(s) => Some(PathBuf::from(s)),
                    _ => return Err(invalid("string")),
                }
            }
            _ => {
                let Some((kind, slot)) = self.params.get_mut(key) else {
                    return Ok(false);
                };
                *slot = kind
                    .coerce(value)
                    .ok_or_else(|| invalid(&format!("{kind:?}").to_lowercase()))?;
            }
        }
        Ok(true)
    }

    pub fn bool_param(&self, key: &str) -> bool {
        self.params
            .get(key)
            .and_then(|(_, v)| v.as_bool())
            .unwrap_or(false)
    }

    pub fn f64_param(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|(_, v)| v.as_f64())
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transform contract
// ---------------------------------------------------------------------------

pub trait Transform: Send {
    fn name(&self) -> &str;

    fn settings(&self) -> &StepSettings;

    fn settings_mut(&mut self) -> &mut StepSettings;

    /// Do the work. Only called when the step is not skipped.
    fn process(&mut self, input: DataModel, outputs: &mut OutputManager) -> Result<DataModel>;

    /// Dual-output access for the ramp fit step.
    fn as_ramp_fit(&mut self) -> Option<&mut dyn RampFit> {
        None
    }

    /// Background-aware access for the background subtraction step.
    fn as_background(&mut self) -> Option<&mut dyn BackgroundSubtraction> {
        None
    }
}

/// Result of fitting a ramp. Which variant comes back is decided by the
/// caller from the fit step's own state, never from the shape of the output.
#[derive(Debug, Clone)]
pub enum FitOutcome {
    /// Exposure-level result only.
    Single(Option<DataModel>),
    /// Exposure-level result and per-integration result.
    Paired(Option<DataModel>, Option<DataModel>),
}

impl FitOutcome {
    pub fn into_parts(self) -> (Option<DataModel>, Option<DataModel>) {
        match self {
            FitOutcome::Single(primary) => (primary, None),
            FitOutcome::Paired(primary, integrations) => (primary, integrations),
        }
    }
}

pub trait RampFit {
    fn fit_exposure(&mut self, input: DataModel, outputs: &mut OutputManager) -> Result<Option<DataModel>>;

    fn fit_paired(
        &mut self,
        input: DataModel,
        outputs: &mut OutputManager,
    ) -> Result<(Option<DataModel>, Option<DataModel>)>;
}

pub trait BackgroundSubtraction {
    fn subtract(
        &mut self,
        input: DataModel,
        backgrounds: &[DataModel],
        outputs: &mut OutputManager,
    ) -> Result<DataModel>;
}

/// How the ramp fit step is asked to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    Exposure,
    Paired,
}

// ---------------------------------------------------------------------------
// Invocation wrappers
// ---------------------------------------------------------------------------

fn describe(model: &DataModel) -> String {
    format!(
        "<{} {:?} {}>",
        model.kind,
        model.data.shape(),
        model.meta.filename.as_deref().unwrap_or("unnamed")
    )
}

fn pass_through(step: &dyn Transform, mut input: DataModel) -> DataModel {
    info!("Step {} skipped.", step.name());
    input.mark_step(step.name(), StepStatus::Skipped);
    input
}

fn save_result(step: &dyn Transform, model: &DataModel, outputs: &mut OutputManager) -> Result<()> {
    let settings = step.settings();
    if settings.save_results {
        let suffix = settings.suffix.as_deref().unwrap_or(step.name());
        outputs.save_in(model, settings.output_dir.as_deref(), suffix)?;
    }
    Ok(())
}

/// Invoke a single-output step.
pub fn run_step(step: &mut dyn Transform, input: DataModel, outputs: &mut OutputManager) -> Result<DataModel> {
    if step.settings().skip {
        return Ok(pass_through(step, input));
    }
    info!("Step {} running with input {}", step.name(), describe(&input));
    let result = step.process(input, outputs)?;
    save_result(step, &result, outputs)?;
    info!("Step {} done", step.name());
    Ok(result)
}

/// Invoke the ramp fit step. A skipped step yields its input as a
/// [`FitOutcome::Single`].
pub fn run_ramp_fit(
    step: &mut dyn Transform,
    input: DataModel,
    mode: FitMode,
    outputs: &mut OutputManager,
) -> Result<FitOutcome> {
    if step.settings().skip {
        return Ok(FitOutcome::Single(Some(pass_through(step, input))));
    }
    info!("Step {} running with input {}", step.name(), describe(&input));
    let name = step.name().to_string();
    let fitter = step.as_ramp_fit().ok_or(PipelineError::NotCapable {
        step: name,
        capability: "a ramp fit",
    })?;
    let outcome = match mode {
        FitMode::Exposure => FitOutcome::Single(fitter.fit_exposure(input, outputs)?),
        FitMode::Paired => {
            let (primary, integrations) = fitter.fit_paired(input, outputs)?;
            FitOutcome::Paired(primary, integrations)
        }
    };
    if let FitOutcome::Single(Some(primary)) | FitOutcome::Paired(Some(primary), _) = &outcome {
        save_result(step, primary, outputs)?;
    }
    info!("Step {} done", step.name());
    Ok(outcome)
}

/// Invoke the background subtraction step with its background exposures.
pub fn run_background(
    step: &mut dyn Transform,
    input: DataModel,
    backgrounds: &[DataModel],
    outputs: &mut OutputManager,
) -> Result<DataModel> {
    if step.settings().skip {
        return Ok(pass_through(step, input));
    }
    info!(
        "Step {} running with input {} and {} background(s)",
        step.name(),
        describe(&input),
        backgrounds.len()
    );
    let name = step.name().to_string();
    let subtractor = step.as_background().ok_or(PipelineError::NotCapable {
        step: name,
        capability: "a background subtraction",
    })?;
    let result = subtractor.subtract(input, backgrounds, outputs)?;
    save_result(step, &result, outputs)?;
    info!("Step {} done", step.name());
    Ok(result)
}
