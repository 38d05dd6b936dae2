//! Shared data models for the imgflow worker.
//!
//! This crate provides Serde-serializable types for:
//! - Inbound job envelopes consumed from the job queues
//! - Typed transformation descriptors (resize, rotate, convert)
//! - Outbound status events published to the status exchange
//! - The error classes that drive acknowledgment decisions

pub mod class;
pub mod error;
pub mod job;
pub mod status;
pub mod transformation;

// Re-export common types
pub use class::{classify_io, ErrorClass};
pub use error::{ModelError, ModelResult};
pub use job::{ImageJob, JobEnvelope};
pub use status::{FailureCode, JobStatus, StatusEvent, StatusMessage, STATUS_PATTERN};
pub use transformation::{
    ResizeParams, Rotation, TargetFormat, Transformation, TransformationType, MAX_OUTPUT_DIMENSION,
};
