//! Directory-backed store: each bucket is a directory under a root.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::ArtifactStore;
use crate::error::StorageError;
use crate::models::ArtifactRecord;

#[derive(Clone, Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    pub fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Blob names in a bucket, sorted. In-flight copies are not blobs.
    pub fn list(&self, bucket: &str) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = std::fs::read_dir(self.bucket_path(bucket))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !is_partial(name))
            .collect();
        names.sort();
        Ok(names)
    }
}

const PARTIAL_SUFFIX: &str = ".partial";

fn is_partial(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != "." && name != ".." && !is_partial(name)
}

#[async_trait]
impl ArtifactStore for DirStore {
    async fn lookup_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        if valid_name(bucket) && self.bucket_path(bucket).is_dir() {
            Ok(())
        } else {
            Err(StorageError::BucketNotFound(bucket.to_string()))
        }
    }

    async fn upload(&self, record: &ArtifactRecord) -> Result<(), StorageError> {
        if !valid_name(&record.blob_name) {
            return Err(StorageError::UploadFailed {
                bucket: record.bucket.clone(),
                blob: record.blob_name.clone(),
                reason: "invalid blob name".to_string(),
            });
        }
        self.lookup_bucket(&record.bucket).await?;

        let dest = self.bucket_path(&record.bucket).join(&record.blob_name);
        copy_atomically(&record.local_path, &dest).await?;
        log::debug!(
            "[Storage] Stored {} as {}",
            record.local_path.display(),
            dest.display()
        );
        Ok(())
    }
}

/// Copy to a hidden `.<blob>.partial` sibling, then rename over the
/// destination. A crash leaves only the hidden file behind.
async fn copy_atomically(src: &Path, dest: &Path) -> Result<(), StorageError> {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX));
    if let Err(e) = tokio::fs::copy(src, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    tokio::fs::rename(&tmp, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_into_existing_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirStore::new(temp_dir.path().join("gs"));
        fs::create_dir_all(store.bucket_path("kernels")).unwrap();

        let src = temp_dir.path().join("bzImage");
        fs::write(&src, b"kernel image").unwrap();

        let record = ArtifactRecord {
            local_path: src,
            bucket: "kernels".to_string(),
            blob_name: "bzImage".to_string(),
        };
        store.upload(&record).await.unwrap();

        assert_eq!(store.list("kernels").unwrap(), vec!["bzImage".to_string()]);
        assert_eq!(
            fs::read(store.bucket_path("kernels").join("bzImage")).unwrap(),
            b"kernel image"
        );
    }

    #[tokio::test]
    async fn test_interrupted_copy_is_not_listed() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirStore::new(temp_dir.path());
        let bucket = store.bucket_path("kernels");
        fs::create_dir_all(&bucket).unwrap();

        // Left behind by a copy that never reached its rename
        fs::write(bucket.join(".bzImage.partial"), b"half an image").unwrap();
        assert!(store.list("kernels").unwrap().is_empty());

        let src = temp_dir.path().join("bzImage");
        fs::write(&src, b"kernel image").unwrap();
        let record = ArtifactRecord {
            local_path: src,
            bucket: "kernels".to_string(),
            blob_name: "bzImage".to_string(),
        };
        store.upload(&record).await.unwrap();
        assert_eq!(store.list("kernels").unwrap(), vec!["bzImage".to_string()]);
        assert!(!bucket.join(".bzImage.partial").exists());
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirStore::new(temp_dir.path());
        assert!(matches!(
            store.lookup_bucket("absent").await,
            Err(StorageError::BucketNotFound(_))
        ));
        assert!(store.lookup_bucket("../escape").await.is_err());
    }
}
