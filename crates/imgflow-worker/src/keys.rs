//! Destination key derivation.

use imgflow_models::Transformation;

use crate::error::{WorkerError, WorkerResult};

/// Prefix every processed object is stored under.
pub const PROCESSED_PREFIX: &str = "processed";

/// Destination object key for a source key and transformation.
///
/// `raw/<...>/<basename>` maps to `processed/<basename>`. CONVERT replaces the
/// basename's last extension with the target format's.
pub fn derive_destination_key(
    source_key: &str,
    transformation: &Transformation,
) -> WorkerResult<String> {
    let segments: Vec<&str> = source_key.split('/').collect();
    if segments.len() < 2 {
        return Err(WorkerError::invalid_key(format!(
            "'{}' has no directory segment",
            source_key
        )));
    }

    let basename = segments[segments.len() - 1];
    if basename.is_empty() || basename == "." || basename == ".." {
        return Err(WorkerError::invalid_key(format!(
            "'{}' has no usable file name",
            source_key
        )));
    }

    let file_name = match transformation.target_format() {
        Some(format) => {
            let stem = match basename.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem,
                _ => {
                    return Err(WorkerError::invalid_key(format!(
                        "'{}' has no extension to replace",
                        source_key
                    )))
                }
            };
            format!("{}.{}", stem, format.extension())
        }
        None => basename.to_string(),
    };

    Ok(format!("{}/{}", PROCESSED_PREFIX, file_name))
}
