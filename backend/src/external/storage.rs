//! Object storage client (Supabase Storage REST API)
//!
//! Stores lab logos and analyst signatures and hands back public URLs.

use reqwest::Client;

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};
use shared::{image_extension, validate_image_upload};

/// Supabase Storage client
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    base_url: String,
    service_key: String,
    bucket: String,
    max_upload_bytes: usize,
}

/// Uploaded object location
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredObject {
    pub path: String,
    pub public_url: String,
}

impl StorageClient {
    /// Create a new StorageClient from configuration
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
            bucket: config.bucket.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    /// Object path for an asset: `{lab_id}/{kind}/{name}.{ext}`
    pub fn object_path(lab_id: uuid::Uuid, kind: &str, name: &str, content_type: &str) -> AppResult<String> {
        let ext = image_extension(content_type).ok_or_else(|| {
            AppError::validation("file", "Only PNG, JPEG or SVG images are accepted")
        })?;
        Ok(format!("{}/{}/{}.{}", lab_id, kind, name, ext))
    }

    /// Public URL of an object in the configured bucket
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    /// Upload (or replace) an image and return its public URL
    pub async fn upload_image(
        &self,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> AppResult<StoredObject> {
        validate_image_upload(content_type, bytes.len(), self.max_upload_bytes)
            .map_err(|m| AppError::validation("file", m))?;

        if self.base_url.is_empty() {
            return Err(AppError::Configuration(
                "Object storage URL is not configured".to_string(),
            ));
        }

        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, path
        );

        tracing::debug!(%path, size = bytes.len(), "uploading object");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| AppError::StorageError(format!("Upload request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, %path, "storage upload rejected");
            return Err(AppError::StorageError(format!(
                "Upload failed: {} - {}",
                status, body
            )));
        }

        Ok(StoredObject {
            path: path.to_string(),
            public_url: self.public_url(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> StorageClient {
        StorageClient::new(&StorageConfig {
            url: "https://proj.supabase.co/".to_string(),
            service_key: "key".to_string(),
            bucket: "lab-assets".to_string(),
            max_upload_bytes: 16,
        })
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            client().public_url("lab/logo/logo.png"),
            "https://proj.supabase.co/storage/v1/object/public/lab-assets/lab/logo/logo.png"
        );
    }

    #[test]
    fn test_object_path_rejects_unknown_types() {
        let lab = uuid::Uuid::nil();
        assert_eq!(
            StorageClient::object_path(lab, "logo", "logo", "image/svg+xml").unwrap(),
            format!("{}/logo/logo.svg", lab)
        );
        assert!(StorageClient::object_path(lab, "logo", "logo", "application/pdf").is_err());
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected_before_request() {
        let err = client()
            .upload_image("a/b.png", "image/png", vec![0u8; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
