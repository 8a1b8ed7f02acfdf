use std::collections::BTreeMap;

use log::{debug, warn};

use crate::data::model::ParamValue;
use crate::error::Result;

use super::TransformRegistry;

/// Parameter name → value for one step.
pub type StepConfig = BTreeMap<String, ParamValue>;

/// Step name → parameters, as found under `step_config` in a run file.
pub type ConfigStructure = BTreeMap<String, StepConfig>;

/// Apply `config` onto the registry's transforms.
///
/// Step names the registry does not have, and parameters a step does not
/// declare, are ignored with a warning so configuration files written for
/// other pipelines still load. A value of the wrong type is an error, and in
/// that case no transform is modified.
pub fn apply_config(registry: &mut TransformRegistry, config: &ConfigStructure) -> Result<()> {
    let mut staged = Vec::new();
    for (step_name, params) in config {
        let Some(step) = registry.get(step_name) else {
            warn!("No step named '{step_name}' in this pipeline; ignoring its configuration");
            continue;
        };
        let mut settings = step.settings().clone();
        for (key, value) in params {
            if settings.set(step_name, key, value)? {
                debug!("{step_name}.{key} = {value}");
            } else {
                warn!("Step '{step_name}' has no parameter '{key}'; ignoring it");
            }
        }
        staged.push((step_name, settings));
    }

    for (step_name, settings) in staged {
        if let Some(step) = registry.get_mut(step_name) {
            *step.settings_mut() = settings;
        }
    }
    Ok(())
}

pub fn config_from_toml(text: &str) -> std::result::Result<ConfigStructure, toml::de::Error> {
    toml::from_str(text)
}

pub fn config_from_json(text: &str) -> serde_json::Result<ConfigStructure> {
    serde_json::from_str(text)
}
