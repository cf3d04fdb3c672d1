//! # contract: seams between the pipeline and the outside world
//!
//! The pipeline only talks to two collaborators:
//! - an [`ObjectStore`] holding the incoming archive, its transformation script
//!   and the transformed result (S3 in production, a local directory offline)
//! - a [`Transformer`] that applies the script to an unpacked feed
//!   (the external GTFS transformation tool)
//!
//! Both traits are annotated for `mockall` so tests can drive the pipeline
//! without S3 or a JVM.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use thiserror::Error;

/// Errors surfaced by an [`ObjectStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a [`Transformer`].
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transformer command is empty")]
    EmptyCommand,
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transformer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("transformer did not finish within {0}s")]
    Timeout(u64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage addressed by bucket and key.
///
/// Objects move through local files so large feeds never have to sit in memory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch `bucket/key` and write it to `dest`, replacing any existing file.
    async fn get_object(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StoreError>;

    /// Upload the file at `src` to `bucket/key`.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: &str,
    ) -> Result<(), StoreError>;
}

/// Applies a transformation script to an unpacked GTFS feed.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Read the feed in `input_dir`, apply `script` and write the result into `output_dir`.
    async fn transform(
        &self,
        input_dir: &Path,
        script: &Path,
        output_dir: &Path,
    ) -> Result<(), TransformError>;
}

/// Where the transformed archive ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub bucket: String,
    pub key: String,
    pub entries: usize,
}

/// Local files handed to the transformer, for callers that run without a store.
#[derive(Debug, Clone)]
pub struct LocalJob {
    pub archive: PathBuf,
    pub script: PathBuf,
    pub output: PathBuf,
}
