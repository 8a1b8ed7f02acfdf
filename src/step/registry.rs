use std::collections::BTreeMap;
use std::fmt;

use crate::data::model::ParamValue;
use crate::error::{PipelineError, Result};
use crate::pipeline::steps::StepList;

use super::Transform;

/// Step name → transform instance, owned by one pipeline.
#[derive(Default)]
pub struct TransformRegistry {
    steps: BTreeMap<String, Box<dyn Transform>>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the transform under `name`, returning the old one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        transform: impl Transform + 'static,
    ) -> Option<Box<dyn Transform>> {
        self.steps.insert(name.into(), Box::new(transform))
    }

    pub fn with(mut self, name: impl Into<String>, transform: impl Transform + 'static) -> Self {
        self.register(name, transform);
        self
    }

    /// Union of `base` and `added`; `added` wins on a name collision.
    pub fn compose(base: TransformRegistry, added: TransformRegistry) -> Self {
        let mut steps = base.steps;
        steps.extend(added.steps);
        Self { steps }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Transform> {
        self.steps.get(name).map(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Transform + 'static)> {
        self.steps.get_mut(name).map(|t| t.as_mut())
    }

    /// Like [`get_mut`](Self::get_mut) but a missing step is an error.
    pub fn require_mut(&mut self, name: &str) -> Result<&mut (dyn Transform + 'static)> {
        self.get_mut(name)
            .ok_or_else(|| PipelineError::MissingStep(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    /// Read back a step parameter (or common flag).
    pub fn parameter(&self, step: &str, key: &str) -> Option<ParamValue> {
        self.get(step).and_then(|t| t.settings().parameter(key))
    }

    /// Every name in `steps` must be registered.
    pub fn validate(&self, steps: &StepList) -> Result<()> {
        match steps.iter().find(|name| !self.contains(name)) {
            Some(unknown) => Err(PipelineError::UnknownStep(unknown.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::calibration::CalibrationStep;

    #[test]
    fn added_steps_override_base() {
        let base = TransformRegistry::new()
            .with("dq_init", CalibrationStep::new("dq_init"))
            .with("saturation", CalibrationStep::new("saturation"));
        let mut replacement = CalibrationStep::new("saturation");
        replacement.settings_mut().skip = true;
        let added = TransformRegistry::new()
            .with("saturation", replacement)
            .with("noise_correction", CalibrationStep::new("noise_correction"));

        let merged = TransformRegistry::compose(base, added);
        assert_eq!(
            merged.names().collect::<Vec<_>>(),
            ["dq_init", "noise_correction", "saturation"]
        );
        assert_eq!(merged.parameter("saturation", "skip"), Some(ParamValue::Bool(true)));
    }

    #[test]
    fn validate_names_first_unknown_step() {
        let registry = TransformRegistry::new().with("dq_init", CalibrationStep::new("dq_init"));
        let steps: StepList = ["dq_init", "bogus", "other"].into_iter().collect();
        assert!(matches!(
            registry.validate(&steps),
            Err(PipelineError::UnknownStep(name)) if name == "bogus"
        ));
    }
}
