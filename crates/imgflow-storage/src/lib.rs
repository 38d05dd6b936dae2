//! S3 object storage gateway.
//!
//! This crate provides:
//! - The [`ObjectStore`] seam used by the worker pipeline and cleanup tasks
//! - [`S3Client`], an `aws-sdk-s3` implementation with per-call timeouts
//! - Public URL generation (presigned GET or a configured public base URL)

pub mod client;
pub mod error;
pub mod store;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use store::ObjectStore;
