use super::{StorageBackend, UploadError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// B2-compatible object-storage adapter.
///
/// Protocol: one authorize call exchanges the application key for a session
/// token plus API/download base URLs; each upload then requests a one-shot
/// upload URL and posts the file with its SHA-1. The session is cached and
/// re-established lazily when missing.
pub struct ObjectStorageBackend {
    client: reqwest::Client,
    key_id: String,
    key: String,
    bucket_id: String,
    endpoint: String,
    session: Mutex<Option<AuthSession>>,
}

#[derive(Debug, Clone)]
struct AuthSession {
    token: String,
    api_url: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    authorization_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

impl ObjectStorageBackend {
    pub fn new(key_id: String, key: String, bucket_id: String, endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            key_id,
            key,
            bucket_id,
            endpoint,
            session: Mutex::new(None),
        }
    }

    /// Exchange the application key for a fresh session.
    async fn authorize(&self) -> Result<AuthSession, UploadError> {
        let credentials = STANDARD.encode(format!("{}:{}", self.key_id, self.key));

        let response = self
            .client
            .get(format!("{}/b2api/v2/b2_authorize_account", self.endpoint))
            .header("Authorization", format!("Basic {credentials}"))
            .send()
            .await
            .map_err(|e| UploadError::Transfer(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Auth(format!("authorize failed: {status} {body}")));
        }

        let body: AuthorizeResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Transfer(format!("authorize response: {e}")))?;

        debug!(api_url = %body.api_url, "object-storage session established");
        Ok(AuthSession {
            token: body.authorization_token,
            api_url: body.api_url,
            download_url: body.download_url,
        })
    }

    /// Get the cached session, authorizing if none is held.
    async fn session(&self) -> Result<AuthSession, UploadError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authorize().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn request_upload_url(
        &self,
        session: &AuthSession,
    ) -> Result<UploadUrlResponse, UploadError> {
        let response = self
            .client
            .post(format!("{}/b2api/v2/b2_get_upload_url", session.api_url))
            .header("Authorization", &session.token)
            .json(&serde_json::json!({ "bucketId": self.bucket_id }))
            .send()
            .await
            .map_err(|e| UploadError::Transfer(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // A stale token is the common cause; drop the session so the
            // next attempt re-authorizes.
            *self.session.lock().await = None;
            return Err(UploadError::Transfer(format!(
                "get_upload_url failed: {status} {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| UploadError::Transfer(format!("upload-url response: {e}")))
    }
}

#[async_trait]
impl StorageBackend for ObjectStorageBackend {
    #[instrument(skip(self, file), fields(path = %path))]
    async fn upload(&self, file: &Path, path: &str) -> Result<String, UploadError> {
        let bytes = tokio::fs::read(file).await?;
        let sha1 = hex::encode(Sha1::digest(&bytes));

        let session = self.session().await?;
        let upload_target = self.request_upload_url(&session).await?;

        debug!(size_bytes = bytes.len(), "uploading to object storage");

        let response = self
            .client
            .post(&upload_target.upload_url)
            .header("Authorization", &upload_target.authorization_token)
            .header("X-Bz-File-Name", path)
            .header("Content-Type", "image/jpeg")
            .header("X-Bz-Content-Sha1", &sha1)
            .body(bytes)
            .send()
            .await
            .map_err(|e| UploadError::Transfer(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Transfer(format!("upload failed: {status} {body}")));
        }

        let url = format!("{}/file/{}/{}", session.download_url, self.bucket_id, path);
        info!(url = %url, "object uploaded");
        Ok(url)
    }

    async fn test_connection(&self) -> bool {
        match self.authorize().await {
            Ok(session) => {
                *self.session.lock().await = Some(session);
                true
            }
            Err(e) => {
                warn!(error = %e, "object-storage connectivity probe failed");
                false
            }
        }
    }
}
