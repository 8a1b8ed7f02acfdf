use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use ndarray::{Array2, Array3, Array4, ArrayD, ArrayView4, Ix4};
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

// ---------------------------------------------------------------------------
// ParamValue – a single step parameter value
// ---------------------------------------------------------------------------

/// A dynamically-typed parameter value as it appears in TOML / JSON step
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "{s}"),
            ParamValue::Integer(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Null => write!(f, "<null>"),
        }
    }
}

impl ParamValue {
    /// Integers widen to `f64`; everything else is not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in configuration error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Integer(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::String(_) => "string",
            ParamValue::Null => "null",
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

// ---------------------------------------------------------------------------
// Exposure metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Instrument {
    Nircam,
    Niriss,
    Nirspec,
    Miri,
    Fgs,
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Instrument::Nircam => "NIRCAM",
            Instrument::Niriss => "NIRISS",
            Instrument::Nirspec => "NIRSPEC",
            Instrument::Miri => "MIRI",
            Instrument::Fgs => "FGS",
        };
        f.write_str(name)
    }
}

/// Completion status recorded by each step that touches a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Complete,
    Skipped,
}

/// Association provenance stamped onto Stage 2 inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnInfo {
    pub pool_name: Option<String>,
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureMeta {
    /// File name (no directory) the model was read from or will be written to.
    #[serde(default)]
    pub filename: Option<String>,
    pub instrument: Instrument,
    /// Exposure type tag, e.g. `NIS_IMAGE`.
    pub exposure_type: String,
    #[serde(default)]
    pub asn: AsnInfo,
    #[serde(default)]
    pub cal_step: BTreeMap<String, StepStatus>,
    /// Gain ratio applied by the gain scale step.
    #[serde(default = "unit_gain")]
    pub gain_factor: f32,
}

fn unit_gain() -> f32 {
    1.0
}

impl ExposureMeta {
    pub fn new(instrument: Instrument, exposure_type: impl Into<String>) -> Self {
        Self {
            filename: None,
            instrument,
            exposure_type: exposure_type.into(),
            asn: AsnInfo::default(),
            cal_step: BTreeMap::new(),
            gain_factor: unit_gain(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

// ---------------------------------------------------------------------------
// DataModel – one exposure in memory
// ---------------------------------------------------------------------------

/// Which data product an array represents. Each kind has a fixed rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// integrations × groups × rows × columns
    Ramp,
    /// integrations × rows × columns
    Cube,
    /// rows × columns
    Image,
}

impl ModelKind {
    pub fn rank(self) -> usize {
        match self {
            ModelKind::Ramp => 4,
            ModelKind::Cube => 3,
            ModelKind::Image => 2,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelKind::Ramp => "ramp",
            ModelKind::Cube => "cube",
            ModelKind::Image => "image",
        };
        f.write_str(name)
    }
}

/// A detector exposure: its array, what kind of product it is, and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    pub kind: ModelKind,
    pub meta: ExposureMeta,
    #[serde(with = "stored_array")]
    pub data: ArrayD<f32>,
}

/// On-disk array layout: `{ "dim": [..], "data": [..] }` in row-major order.
/// JSON has no literal for NaN or infinities, so those samples are written
/// as the strings `"NaN"`, `"inf"` and `"-inf"`.
mod stored_array {
    use ndarray::{ArrayD, IxDyn};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Sample {
        Number(f32),
        Text(String),
    }

    #[derive(Serialize, Deserialize)]
    struct Stored {
        dim: Vec<usize>,
        data: Vec<Sample>,
    }

    pub fn serialize<S: Serializer>(array: &ArrayD<f32>, serializer: S) -> Result<S::Ok, S::Error> {
        let data = array
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    Sample::Number(v)
                } else {
                    Sample::Text(v.to_string())
                }
            })
            .collect();
        Stored {
            dim: array.shape().to_vec(),
            data,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ArrayD<f32>, D::Error> {
        let stored = Stored::deserialize(deserializer)?;
        let data = stored
            .data
            .into_iter()
            .map(|sample| match sample {
                Sample::Number(v) => Ok(v),
                Sample::Text(text) => text
                    .parse::<f32>()
                    .map_err(|_| D::Error::custom(format!("invalid sample '{text}'"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        ArrayD::from_shape_vec(IxDyn(&stored.dim), data).map_err(D::Error::custom)
    }
}

impl DataModel {
    /// Build a model, rejecting arrays whose rank disagrees with `kind`.
    pub fn new(kind: ModelKind, data: ArrayD<f32>, meta: ExposureMeta) -> Result<Self, ShapeError> {
        let model = Self { kind, meta, data };
        model.validate()?;
        Ok(model)
    }

    pub fn ramp(data: Array4<f32>, meta: ExposureMeta) -> Self {
        Self {
            kind: ModelKind::Ramp,
            meta,
            data: data.into_dyn(),
        }
    }

    pub fn cube(data: Array3<f32>, meta: ExposureMeta) -> Self {
        Self {
            kind: ModelKind::Cube,
            meta,
            data: data.into_dyn(),
        }
    }

    pub fn image(data: Array2<f32>, meta: ExposureMeta) -> Self {
        Self {
            kind: ModelKind::Image,
            meta,
            data: data.into_dyn(),
        }
    }

    pub fn validate(&self) -> Result<(), ShapeError> {
        let expected = self.kind.rank();
        if self.data.ndim() != expected {
            return Err(ShapeError::WrongRank {
                kind: self.kind,
                expected,
                found: self.data.ndim(),
            });
        }
        Ok(())
    }

    /// Fail unless this model is of the given kind.
    pub fn require_kind(&self, expected: ModelKind) -> Result<(), ShapeError> {
        if self.kind != expected {
            return Err(ShapeError::WrongKind {
                expected,
                found: self.kind,
            });
        }
        self.validate()
    }

    /// View the array as a 4-D ramp.
    pub fn ramp_view(&self) -> Result<ArrayView4<'_, f32>, ShapeError> {
        self.require_kind(ModelKind::Ramp)?;
        self.data
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| ShapeError::WrongRank {
                kind: ModelKind::Ramp,
                expected: 4,
                found: self.data.ndim(),
            })
    }

    /// Multi-integration product (per-integration structure retained).
    pub fn is_cube(&self) -> bool {
        self.kind == ModelKind::Cube
    }

    pub fn instrument(&self) -> Instrument {
        self.meta.instrument
    }

    pub fn mark_step(&mut self, step: &str, status: StepStatus) {
        self.meta.cal_step.insert(step.to_string(), status);
    }

    pub fn step_status(&self, step: &str) -> Option<StepStatus> {
        self.meta.cal_step.get(step).copied()
    }
}

// ---------------------------------------------------------------------------
// Associations
// ---------------------------------------------------------------------------

/// An exposure referenced by an association: either a file or a model that is
/// already in memory.
#[derive(Debug, Clone)]
pub enum ExposureRef {
    Path(PathBuf),
    Model(Box<DataModel>),
}

impl ExposureRef {
    /// Name used in log messages.
    pub fn display_name(&self) -> String {
        match self {
            ExposureRef::Path(p) => p.display().to_string(),
            ExposureRef::Model(m) => m
                .meta
                .filename
                .clone()
                .unwrap_or_else(|| "<in-memory model>".to_string()),
        }
    }
}

impl From<PathBuf> for ExposureRef {
    fn from(path: PathBuf) -> Self {
        ExposureRef::Path(path)
    }
}

impl From<&std::path::Path> for ExposureRef {
    fn from(path: &std::path::Path) -> Self {
        ExposureRef::Path(path.to_path_buf())
    }
}

impl From<&str> for ExposureRef {
    fn from(path: &str) -> Self {
        ExposureRef::Path(PathBuf::from(path))
    }
}

impl From<DataModel> for ExposureRef {
    fn from(model: DataModel) -> Self {
        ExposureRef::Model(Box::new(model))
    }
}

/// One typed member of a product (`science`, `background`, ...).
#[derive(Debug, Clone)]
pub struct Member {
    pub exptype: String,
    pub exposure: ExposureRef,
}

impl Member {
    pub fn new(exptype: impl Into<String>, exposure: impl Into<ExposureRef>) -> Self {
        Self {
            exptype: exptype.into(),
            exposure: exposure.into(),
        }
    }
}

/// One association entry: a science exposure plus its auxiliary members.
#[derive(Debug, Clone)]
pub struct ExposureProduct {
    pub name: String,
    pub members: Vec<Member>,
}

/// Placeholder table name for associations that never lived on disk.
pub const SINGLETON_TABLE: &str = "singleton";

#[derive(Debug, Clone)]
pub struct Association {
    pub asn_pool: String,
    pub products: Vec<ExposureProduct>,
    /// On-disk identity, when the association was read from a file.
    pub filename: Option<String>,
}

impl Association {
    /// Base name of the association file, or [`SINGLETON_TABLE`].
    pub fn table_name(&self) -> String {
        self.filename
            .as_deref()
            .and_then(|f| std::path::Path::new(f).file_name())
            .and_then(|f| f.to_str())
            .unwrap_or(SINGLETON_TABLE)
            .to_string()
    }
}
