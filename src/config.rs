//! Run configuration for the batch driver.
//!
//! Expected TOML layout:
//!
//! ```toml
//! input_file = "raw/jw01189017001_06101_00001_nis_uncal.json"
//! output_dir_parent = "results"
//! stage1_subdir = "stage1"
//! stage2_subdir = "stage2"
//! run_stage1 = true
//! run_stage2 = true
//! steps_stage2 = ["assign_wcs", "flat_field", "noise_correction"]
//!
//! [step_config.noise_correction]
//! iterative = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::warn;
use serde::Deserialize;

use crate::pipeline::steps::StepList;
use crate::step::config::ConfigStructure;

/// A single path or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<PathBuf> {
        match self {
            OneOrMany::One(path) => vec![path],
            OneOrMany::Many(paths) => paths,
        }
    }
}

/// The file as written; see [`RunConfig::resolve`] for how keys combine.
/// Keys it does not know are ignored with a warning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    pub input_file: Option<OneOrMany>,
    pub input_files: Option<OneOrMany>,
    pub output_dir_parent: PathBuf,
    pub stage1_subdir: Option<PathBuf>,
    pub stage2_subdir: Option<PathBuf>,
    pub steps: Option<Vec<String>>,
    pub steps_stage1: Option<Vec<String>>,
    pub steps_stage2: Option<Vec<String>>,
    pub step_config: Option<ConfigStructure>,
    pub stage1_config: Option<ConfigStructure>,
    pub stage2_config: Option<ConfigStructure>,
    #[serde(default)]
    pub run_stage1: bool,
    #[serde(default)]
    pub run_stage2: bool,
    #[serde(flatten)]
    unknown: BTreeMap<String, toml::Value>,
}

/// What the driver actually does, with every fallback settled.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub input_files: Vec<PathBuf>,
    pub stage1_dir: PathBuf,
    pub stage2_dir: PathBuf,
    pub steps_stage1: Option<StepList>,
    pub steps_stage2: Option<StepList>,
    pub stage1_config: Option<ConfigStructure>,
    pub stage2_config: Option<ConfigStructure>,
    pub run_stage1: bool,
    pub run_stage2: bool,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading run configuration {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid run configuration")?;
        for key in config.unknown.keys() {
            warn!("Ignoring unknown run configuration key '{key}'");
        }
        Ok(config)
    }

    /// Settle the input list, output directories, step lists and step
    /// configuration.
    ///
    /// Exactly one of `input_file` and `input_files` must be given. `steps`
    /// takes precedence over `steps_stage1`, and `step_config` over
    /// `stage1_config`. Stage 2 uses `stage2_config` when present, and falls
    /// back to `step_config` otherwise.
    pub fn resolve(self) -> Result<RunPlan> {
        let input_files = match (self.input_file, self.input_files) {
            (Some(files), None) | (None, Some(files)) => files.into_vec(),
            (Some(_), Some(_)) => bail!("input_files and input_file cannot both be provided"),
            (None, None) => bail!("one of input_file or input_files must be provided"),
        };

        let stage_dir = |subdir: Option<PathBuf>| match subdir {
            Some(sub) => self.output_dir_parent.join(sub),
            None => self.output_dir_parent.clone(),
        };
        let stage1_dir = stage_dir(self.stage1_subdir);
        let stage2_dir = stage_dir(self.stage2_subdir);

        let steps_stage1 = self.steps.or(self.steps_stage1).map(StepList::from);
        let steps_stage2 = self.steps_stage2.map(StepList::from);

        let stage2_config = match self.stage2_config {
            Some(config) => Some(config),
            None => self.step_config.clone(),
        };
        let stage1_config = self.step_config.or(self.stage1_config);

        Ok(RunPlan {
            input_files,
            stage1_dir,
            stage2_dir,
            steps_stage1,
            steps_stage2,
            stage1_config,
            stage2_config,
            run_stage1: self.run_stage1,
            run_stage2: self.run_stage2,
        })
    }
}

impl RunPlan {
    /// Stage 1 products of `input_file` that feed Stage 2: its `rate` and
    /// `rateints` files in the Stage 1 directory.
    pub fn stage2_inputs(&self, input_file: &Path) -> Vec<PathBuf> {
        let file_name = input_file
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        ["rate", "rateints"]
            .into_iter()
            .map(|suffix| self.stage1_dir.join(file_name.replace("uncal", suffix)))
            .collect()
    }
}
