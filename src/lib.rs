//! Step sequencing for detector ramp calibration.
//!
//! [`pipeline::Stage1Pipeline`] turns an uncalibrated ramp into count-rate
//! products; [`pipeline::Stage2Pipeline`] calibrates those products per
//! association entry. Both run named [`step::Transform`]s looked up in a
//! [`step::TransformRegistry`], including the column noise correction in
//! [`step::noise`].

pub mod config;
pub mod data;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod step;

pub use error::{PipelineError, Result};
