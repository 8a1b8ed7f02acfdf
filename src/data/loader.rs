use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::model::{
    Association, DataModel, ExposureProduct, ExposureRef, Member, ModelKind,
};
use crate::error::{PipelineError, Result};
use crate::output::strip_known_suffix;

// ---------------------------------------------------------------------------
// Exposure container
// ---------------------------------------------------------------------------

/// Open an exposure file of any kind. Dispatch by extension.
///
/// Supported formats:
/// * `.json` – `{ "kind": "ramp", "meta": {...}, "data": { "dim": [..], "data": [..] } }`
pub fn open_model(path: &Path) -> Result<DataModel> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let model = match ext.as_str() {
        "json" => read_json_model(path)?,
        other => return Err(PipelineError::UnsupportedFormat(other.to_string())),
    };
    finish_model(model, path)
}

/// Validate a freshly read model and record the file it came from.
fn finish_model(mut model: DataModel, path: &Path) -> Result<DataModel> {
    model.validate()?;
    if let Some(name) = path.file_name().and_then(|f| f.to_str()) {
        model.meta.filename = Some(name.to_string());
    }
    Ok(model)
}

fn read_json_model(path: &Path) -> Result<DataModel> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let model = serde_json::from_reader(BufReader::new(file))?;
    Ok(model)
}

/// Open (or take) an exposure without constraining its kind.
pub fn open_exposure(exposure: &ExposureRef) -> Result<DataModel> {
    match exposure {
        ExposureRef::Path(path) => open_model(path),
        ExposureRef::Model(model) => {
            model.validate()?;
            Ok(model.as_ref().clone())
        }
    }
}

/// Open an exposure that must be a 4-D ramp.
pub fn open_ramp(exposure: ExposureRef) -> Result<DataModel> {
    let model = match exposure {
        ExposureRef::Path(path) => open_model(&path)?,
        ExposureRef::Model(model) => *model,
    };
    model.require_kind(ModelKind::Ramp)?;
    Ok(model)
}

/// Write a model as a JSON container, creating parent directories.
pub fn save_model(model: &DataModel, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::to_writer(BufWriter::new(file), model)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Association resolution
// ---------------------------------------------------------------------------

/// Input accepted by the Stage 2 resolver.
#[derive(Debug, Clone)]
pub enum AsnInput {
    /// A ready-made association.
    Association(Association),
    /// An association file, or a single exposure file.
    Path(PathBuf),
    /// Loose exposures, each becoming its own product.
    Exposures(Vec<ExposureRef>),
}

impl From<Association> for AsnInput {
    fn from(asn: Association) -> Self {
        AsnInput::Association(asn)
    }
}

impl From<PathBuf> for AsnInput {
    fn from(path: PathBuf) -> Self {
        AsnInput::Path(path)
    }
}

impl From<&str> for AsnInput {
    fn from(path: &str) -> Self {
        AsnInput::Path(PathBuf::from(path))
    }
}

impl From<Vec<PathBuf>> for AsnInput {
    fn from(paths: Vec<PathBuf>) -> Self {
        AsnInput::Exposures(paths.into_iter().map(ExposureRef::Path).collect())
    }
}

impl From<Vec<DataModel>> for AsnInput {
    fn from(models: Vec<DataModel>) -> Self {
        AsnInput::Exposures(models.into_iter().map(ExposureRef::from).collect())
    }
}

impl From<DataModel> for AsnInput {
    fn from(model: DataModel) -> Self {
        AsnInput::Exposures(vec![ExposureRef::from(model)])
    }
}

/// Pool name given to associations built from loose exposures.
const LOOSE_POOL: &str = "none";

/// Expected association schema:
///
/// ```json
/// {
///   "asn_pool": "jw01189_pool.csv",
///   "products": [
///     {
///       "name": "jw01189017001_06101_00001_nis",
///       "members": [
///         { "expname": "jw01189017001_06101_00001_nis_rate.json", "exptype": "science" }
///       ]
///     }
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
struct AsnFile {
    #[serde(default = "loose_pool")]
    asn_pool: String,
    products: Vec<AsnProductRecord>,
}

/// A JSON file handed to the Stage 2 resolver: an association table when it
/// has `products`, otherwise a single exposure.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonDocument {
    Association(AsnFile),
    Exposure(Box<DataModel>),
}

#[derive(Debug, Deserialize)]
struct AsnProductRecord {
    name: String,
    members: Vec<AsnMemberRecord>,
}

#[derive(Debug, Deserialize)]
struct AsnMemberRecord {
    expname: String,
    exptype: String,
}

fn loose_pool() -> String {
    LOOSE_POOL.to_string()
}

/// Resolve any Stage 2 input into an [`Association`].
///
/// `basename` names the product when a single loose exposure is given.
pub fn load_association(input: AsnInput, basename: Option<&str>) -> Result<Association> {
    match input {
        AsnInput::Association(asn) => Ok(asn),
        AsnInput::Exposures(exposures) => Ok(association_from_exposures(exposures, basename)),
        AsnInput::Path(path) => {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            if ext != "json" {
                return Err(PipelineError::UnsupportedFormat(ext));
            }
            let file = File::open(&path).map_err(|e| PipelineError::io(&path, e))?;
            let document = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                PipelineError::Association(format!(
                    "{} is neither an association nor an exposure: {e}",
                    path.display()
                ))
            })?;
            match document {
                JsonDocument::Association(asn) => read_association(&path, asn),
                JsonDocument::Exposure(model) => {
                    let model = finish_model(*model, &path)?;
                    Ok(association_from_exposures(vec![model.into()], basename))
                }
            }
        }
    }
}

fn read_association(path: &Path, asn: AsnFile) -> Result<Association> {
    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));

    let mut products = Vec::with_capacity(asn.products.len());
    for (i, product) in asn.products.into_iter().enumerate() {
        if product.members.is_empty() {
            return Err(PipelineError::Association(format!(
                "product {i} ('{}') has no members",
                product.name
            )));
        }
        let members = product
            .members
            .into_iter()
            .map(|m| Member::new(m.exptype, base_dir.join(m.expname)))
            .collect();
        products.push(ExposureProduct {
            name: product.name,
            members,
        });
    }

    Ok(Association {
        asn_pool: asn.asn_pool,
        products,
        filename: path.to_str().map(str::to_string),
    })
}

fn association_from_exposures(exposures: Vec<ExposureRef>, basename: Option<&str>) -> Association {
    let single = exposures.len() == 1;
    let products = exposures
        .into_iter()
        .enumerate()
        .map(|(i, exposure)| {
            let name = match basename {
                Some(base) if single => base.to_string(),
                _ => product_name(&exposure, i),
            };
            ExposureProduct {
                name,
                members: vec![Member::new("science", exposure)],
            }
        })
        .collect();

    Association {
        asn_pool: LOOSE_POOL.to_string(),
        products,
        filename: None,
    }
}

fn product_name(exposure: &ExposureRef, index: usize) -> String {
    let file_name = match exposure {
        ExposureRef::Path(path) => path
            .file_name()
            .and_then(|f| f.to_str())
            .map(str::to_string),
        ExposureRef::Model(model) => model.meta.filename.clone(),
    };
    match file_name {
        Some(name) => strip_known_suffix(&name),
        None => format!("exposure_{index}"),
    }
}
