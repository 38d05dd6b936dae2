//! Image transformation backend.
//!
//! This crate provides:
//! - The [`Transformer`] seam the worker pipeline depends on
//! - [`ImageTransformer`], a pure in-memory implementation on the `image` crate
//!   covering RESIZE, FORCE_RESIZE, ROTATE and CONVERT

pub mod error;
pub mod transform;

pub use error::{MediaError, MediaResult};
pub use transform::{ImageTransformer, TransformedImage, Transformer};
