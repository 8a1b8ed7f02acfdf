//! The two sequencers and the step orders they run.
//!
//! ```text
//!   uncal ramp ──▶ Stage1Pipeline ──▶ rate / rateints ──▶ Stage2Pipeline ──▶ cal / calints
//! ```
//!
//! Each pipeline owns its own [`TransformRegistry`](crate::step::TransformRegistry),
//! built from a standard set of steps plus the steps this crate adds.

pub mod stage1;
pub mod stage2;
pub mod steps;

pub use stage1::{Stage1Output, Stage1Pipeline};
pub use stage2::Stage2Pipeline;
pub use steps::{default_step_list, Stage, StepList};
