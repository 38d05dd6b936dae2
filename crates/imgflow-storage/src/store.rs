//! Object store seam.

use async_trait::async_trait;

use crate::error::StorageResult;

/// Narrow storage interface used by the worker.
///
/// Each call is bounded by an implementation-defined timeout. Implementations
/// are shared by every worker and must be safe for concurrent use.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's bytes.
    async fn download(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Store bytes under `key` and return a URL the status consumer can hand out.
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String>;

    /// Remove an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}
