//! S3 client implementation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ChecksumAlgorithm;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket holding raw uploads and processed results
    pub bucket_name: String,
    /// Region override; the SDK default chain is used when unset
    pub region: Option<String>,
    /// Custom S3 API endpoint (MinIO, R2)
    pub endpoint_url: Option<String>,
    /// When set, public URLs are `<base>/<key>` instead of presigned
    pub public_base_url: Option<String>,
    /// Lifetime of presigned GET URLs
    pub presign_expiry: Duration,
    pub download_timeout: Duration,
    pub upload_timeout: Duration,
    pub delete_timeout: Duration,
}

impl S3Config {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            region: None,
            endpoint_url: None,
            public_base_url: None,
            presign_expiry: Duration::from_secs(900),
            download_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(60),
            delete_timeout: Duration::from_secs(60),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let bucket_name = std::env::var("AWS_BUCKET_NAME")
            .map_err(|_| StorageError::config_error("AWS_BUCKET_NAME not set"))?;

        let secs = |name: &str, default: u64| {
            Duration::from_secs(
                std::env::var(name)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(default),
            )
        };

        Ok(Self {
            bucket_name,
            region: std::env::var("AWS_REGION").ok(),
            endpoint_url: std::env::var("S3_ENDPOINT_URL").ok(),
            public_base_url: std::env::var("S3_PUBLIC_BASE_URL").ok(),
            presign_expiry: secs("S3_PRESIGN_EXPIRY_SECS", 900),
            download_timeout: secs("S3_DOWNLOAD_TIMEOUT_SECS", 30),
            upload_timeout: secs("S3_UPLOAD_TIMEOUT_SECS", 60),
            delete_timeout: secs("S3_DELETE_TIMEOUT_SECS", 60),
        })
    }
}

/// S3 storage client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    config: S3Config,
}

impl S3Client {
    /// Create a new S3 client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = S3Config::from_env()?;
        Self::new(config).await
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    /// Download object as bytes.
    pub async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        debug!("Downloading {}", key);

        with_timeout("download", key, self.config.download_timeout, async {
            let response = self
                .client
                .get_object()
                .bucket(&self.config.bucket_name)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e, StorageError::DownloadFailed))?;

            let bytes = response
                .body
                .collect()
                .await
                .map_err(|e| StorageError::download_failed(e.to_string()))?
                .into_bytes()
                .to_vec();

            Ok(bytes)
        })
        .await
    }

    /// Upload bytes and return the object's public URL.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let size = data.len();
        debug!("Uploading {} bytes to {}", size, key);

        with_timeout("upload", key, self.config.upload_timeout, async {
            self.client
                .put_object()
                .bucket(&self.config.bucket_name)
                .key(key)
                .body(ByteStream::from(data))
                .content_type(content_type)
                .checksum_algorithm(ChecksumAlgorithm::Sha256)
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e, StorageError::UploadFailed))?;

            self.public_url(key).await
        })
        .await
        .inspect(|_| info!("Uploaded {} bytes to {}", size, key))
    }

    /// Delete an object.
    pub async fn delete_object(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("key cannot be empty".to_string()));
        }
        debug!("Deleting {}", key);

        with_timeout("delete", key, self.config.delete_timeout, async {
            self.client
                .delete_object()
                .bucket(&self.config.bucket_name)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e, StorageError::DeleteFailed))?;
            Ok(())
        })
        .await
    }

    /// URL the status consumer receives for an uploaded object.
    pub async fn public_url(&self, key: &str) -> StorageResult<String> {
        match &self.config.public_base_url {
            Some(base) => Ok(join_public_url(base, key)),
            None => self.presign_get(key, self.config.presign_expiry).await,
        }
    }

    /// Generate a presigned URL for GET.
    pub async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        let bucket = self.config.bucket_name.clone();
        with_timeout("head_bucket", &bucket, self.config.download_timeout, async {
            self.client
                .head_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| map_sdk_error(&bucket, e, StorageError::AwsSdk))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.download_bytes(key).await
    }

    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        self.upload_bytes(data, key, content_type).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.delete_object(key).await
    }
}

async fn with_timeout<T, F>(operation: &str, key: &str, limit: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        StorageError::timeout(format!("{} {} exceeded {:?}", operation, key, limit))
    })?
}

/// Map an SDK failure onto the storage taxonomy.
fn map_sdk_error<E, R>(
    key: &str,
    err: SdkError<E, R>,
    fallback: fn(String) -> StorageError,
) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();

    match &err {
        SdkError::TimeoutError(_) => StorageError::timeout(message),
        SdkError::DispatchFailure(_) => StorageError::Connection(message),
        _ => match err.code() {
            Some("NoSuchKey") | Some("NotFound") => StorageError::not_found(key),
            Some(code) if is_credentials_code(code) => StorageError::CredentialsRejected(message),
            _ => fallback(message),
        },
    }
}

fn is_credentials_code(code: &str) -> bool {
    matches!(
        code,
        "AccessDenied"
            | "InvalidAccessKeyId"
            | "SignatureDoesNotMatch"
            | "ExpiredToken"
            | "InvalidToken"
    )
}

fn join_public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}
