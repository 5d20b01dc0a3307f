//! Google Cloud Storage over its JSON API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use super::ArtifactStore;
use crate::config::ServerConfig;
use crate::error::StorageError;
use crate::gce::TokenSource;
use crate::models::ArtifactRecord;

#[derive(Clone, Debug)]
pub struct GcsStore {
    client: Client,
    endpoint: String,
    tokens: TokenSource,
}

impl GcsStore {
    pub fn new(endpoint: impl Into<String>, tokens: TokenSource) -> Self {
        GcsStore {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.storage_endpoint.clone(), TokenSource::from_config(config))
    }

    /// `<endpoint>/<segments...>`, each segment percent-encoded.
    fn api_url(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| format!("invalid storage endpoint {}: {}", self.endpoint, e))?;
        url.path_segments_mut()
            .map_err(|_| format!("storage endpoint {} cannot take a path", self.endpoint))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn bearer(&self) -> Result<String, StorageError> {
        self.tokens.token().await.map_err(StorageError::Token)
    }
}

#[async_trait]
impl ArtifactStore for GcsStore {
    async fn lookup_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let url = self
            .api_url(&["storage", "v1", "b", bucket])
            .map_err(|reason| StorageError::LookupFailed {
                bucket: bucket.to_string(),
                reason,
            })?;
        let token = self.bearer().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StorageError::LookupFailed {
                bucket: bucket.to_string(),
                reason: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StorageError::BucketNotFound(bucket.to_string())),
            status => Err(StorageError::LookupFailed {
                bucket: bucket.to_string(),
                reason: format!("HTTP {}", status),
            }),
        }
    }

    async fn upload(&self, record: &ArtifactRecord) -> Result<(), StorageError> {
        let body = tokio::fs::read(&record.local_path).await?;
        let size = body.len();
        let failed = |reason: String| StorageError::UploadFailed {
            bucket: record.bucket.clone(),
            blob: record.blob_name.clone(),
            reason,
        };

        let url = self
            .api_url(&["upload", "storage", "v1", "b", &record.bucket, "o"])
            .map_err(failed)?;
        let token = self.bearer().await?;

        let response = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", record.blob_name.as_str())])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {}: {}", status, text.trim())));
        }

        log::info!(
            "[Storage] Uploaded {} ({} bytes) to gs://{}/{}",
            record.local_path.display(),
            size,
            record.bucket,
            record.blob_name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::fs;
    use tempfile::TempDir;

    fn store(url: String) -> GcsStore {
        GcsStore::new(url, TokenSource::Static("tok".to_string()))
    }

    #[tokio::test]
    async fn test_lookup_bucket_statuses() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/storage/v1/b/kernels")
            .match_header("authorization", "Bearer tok")
            .with_body(r#"{"name":"kernels"}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/storage/v1/b/absent")
            .with_status(404)
            .create_async()
            .await;
        let _denied = server
            .mock("GET", "/storage/v1/b/private")
            .with_status(403)
            .create_async()
            .await;

        let gcs = store(server.url());
        assert!(gcs.lookup_bucket("kernels").await.is_ok());
        assert!(matches!(
            gcs.lookup_bucket("absent").await,
            Err(StorageError::BucketNotFound(_))
        ));
        assert!(matches!(
            gcs.lookup_bucket("private").await,
            Err(StorageError::LookupFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_bucket_name_is_one_path_segment() {
        let mut server = mockito::Server::new_async().await;
        let escaped = server
            .mock("GET", "/storage/v1/b/team%2Fkernels%20v2")
            .with_body(r#"{"name":"team/kernels v2"}"#)
            .create_async()
            .await;
        let gcs = store(format!("{}/", server.url()));
        assert!(gcs.lookup_bucket("team/kernels v2").await.is_ok());
        escaped.assert_async().await;
    }

    #[test]
    fn test_api_url_rejects_bad_endpoint() {
        let gcs = store("not a url".to_string());
        assert!(gcs.api_url(&["storage"]).is_err());
    }

    #[tokio::test]
    async fn test_upload_sends_media_body() {
        let temp_dir = TempDir::new().unwrap();
        let image = temp_dir.path().join("bzImage");
        fs::write(&image, b"kernel bytes").unwrap();

        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/upload/storage/v1/b/kernels/o")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("uploadType".into(), "media".into()),
                Matcher::UrlEncoded("name".into(), "bzImage".into()),
            ]))
            .match_header("authorization", "Bearer tok")
            .match_body("kernel bytes")
            .with_body(r#"{"name":"bzImage"}"#)
            .create_async()
            .await;

        let record = ArtifactRecord {
            local_path: image,
            bucket: "kernels".to_string(),
            blob_name: "bzImage".to_string(),
        };
        store(server.url()).upload(&record).await.unwrap();
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let image = temp_dir.path().join("bzImage");
        fs::write(&image, b"kernel bytes").unwrap();

        let mut server = mockito::Server::new_async().await;
        let _upload = server
            .mock("POST", "/upload/storage/v1/b/kernels/o")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("backend error")
            .create_async()
            .await;

        let record = ArtifactRecord {
            local_path: image,
            bucket: "kernels".to_string(),
            blob_name: "bzImage".to_string(),
        };
        let err = store(server.url()).upload(&record).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
