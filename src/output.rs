use std::path::{Path, PathBuf};

use log::info;

use crate::data::loader::save_model;
use crate::data::model::DataModel;
use crate::error::Result;

/// Product suffixes recognised at the end of a file stem.
const KNOWN_SUFFIXES: &[&str] = &[
    "gain_scaleints",
    "noise_correction",
    "column_constants",
    "dark_current",
    "group_scale",
    "gain_scale",
    "persistence",
    "bkg_subtract",
    "assign_wcs",
    "flat_field",
    "firstframe",
    "saturation",
    "lastframe",
    "linearity",
    "superbias",
    "rateints",
    "bsubints",
    "resample",
    "ramp_fit",
    "calints",
    "dq_init",
    "refpix",
    "photom",
    "uncal",
    "reset",
    "rscd",
    "ramp",
    "rate",
    "bsub",
    "jump",
    "ipc",
    "cal",
    "i2d",
];

const OUTPUT_EXTENSION: &str = "json";

/// Drop the extension and one trailing known `_suffix` from a file name.
pub fn strip_known_suffix(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    for suffix in KNOWN_SUFFIXES {
        if let Some(base) = stem.strip_suffix(suffix).and_then(|s| s.strip_suffix('_')) {
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    stem.to_string()
}

/// `jw01_uncal.json` + `rate` → `jw01_rate.json`.
pub fn output_name(base: &str, suffix: &str) -> String {
    format!("{}_{suffix}.{OUTPUT_EXTENSION}", strip_known_suffix(base))
}

/// One save request issued during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedProduct {
    pub suffix: String,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Output manager
// ---------------------------------------------------------------------------

/// Where a pipeline writes its products, plus a ledger of every save request.
///
/// A detached manager records requests without touching the filesystem.
#[derive(Debug, Clone)]
pub struct OutputManager {
    output_dir: PathBuf,
    persist: bool,
    saved: Vec<SavedProduct>,
}

impl Default for OutputManager {
    fn default() -> Self {
        Self::new(".")
    }
}

impl OutputManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            persist: true,
            saved: Vec::new(),
        }
    }

    pub fn detached() -> Self {
        Self {
            persist: false,
            ..Self::new(".")
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path a model would be written to under `suffix`. `dir` replaces the
    /// output directory when given.
    pub fn output_path(&self, model: &DataModel, dir: Option<&Path>, suffix: &str) -> PathBuf {
        let base = model.meta.filename.as_deref().unwrap_or("output");
        dir.unwrap_or(self.output_dir.as_path()).join(output_name(base, suffix))
    }

    pub fn save(&mut self, model: &DataModel, suffix: &str) -> Result<PathBuf> {
        self.save_in(model, None, suffix)
    }

    /// Save into `dir` instead of the output directory.
    pub fn save_in(&mut self, model: &DataModel, dir: Option<&Path>, suffix: &str) -> Result<PathBuf> {
        let path = self.output_path(model, dir, suffix);
        if self.persist {
            save_model(model, &path)?;
            info!("Saved model in {}", path.display());
        }
        self.saved.push(SavedProduct {
            suffix: suffix.to_string(),
            path: path.clone(),
        });
        Ok(path)
    }

    /// All save requests so far, in order.
    pub fn saved(&self) -> &[SavedProduct] {
        &self.saved
    }

    pub fn saved_with_suffix<'a>(&'a self, suffix: &'a str) -> impl Iterator<Item = &'a SavedProduct> {
        self.saved.iter().filter(move |s| s.suffix == suffix)
    }
}
