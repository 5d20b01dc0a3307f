//! Durable artifact storage.
//!
//! The orchestrator only needs two things from a store: confirm a bucket
//! exists, and put one local file into it under a blob name.

pub mod dir;
pub mod gcs;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::ArtifactRecord;

pub use dir::DirStore;
pub use gcs::GcsStore;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fails with `StorageError::BucketNotFound` when the bucket is missing.
    async fn lookup_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Copy `record.local_path` to `record.bucket`/`record.blob_name`,
    /// replacing any existing blob of that name.
    async fn upload(&self, record: &ArtifactRecord) -> Result<(), StorageError>;
}
