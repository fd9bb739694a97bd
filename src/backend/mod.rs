mod nas;
mod object_storage;

pub use nas::NasBackend;
pub use object_storage::ObjectStorageBackend;

use crate::config::{BackendKind, BackendSettings, NasProtocol};
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors from a backend upload.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("local file error: {0}")]
    LocalFile(#[from] std::io::Error),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("remote directory error: {0}")]
    RemoteDir(String),
}

/// Active backend configuration: exactly one variant is live at a time.
///
/// A tagged union rather than a trait hierarchy; switching the active
/// variant never rewrites URLs already recorded on uploaded images.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    ObjectStorage {
        key_id: String,
        key: String,
        bucket_id: String,
        endpoint: String,
    },
    Nas {
        host: String,
        port: u16,
        user: String,
        pass: String,
        protocol: NasProtocol,
        base_folder: String,
    },
}

impl BackendConfig {
    /// Resolve the active variant from the loaded settings.
    pub fn from_settings(settings: &BackendSettings) -> anyhow::Result<Self> {
        match settings.kind {
            BackendKind::ObjectStorage => {
                let os = settings
                    .object_storage
                    .as_ref()
                    .context("backend.kind is object_storage but [backend.object_storage] is missing")?;
                Ok(Self::ObjectStorage {
                    key_id: os.key_id.clone(),
                    key: os.key.clone(),
                    bucket_id: os.bucket_id.clone(),
                    endpoint: os.endpoint.clone(),
                })
            }
            BackendKind::Nas => {
                let nas = settings
                    .nas
                    .as_ref()
                    .context("backend.kind is nas but [backend.nas] is missing")?;
                if nas.host.is_empty() {
                    bail!("backend.nas.host must not be empty");
                }
                Ok(Self::Nas {
                    host: nas.host.clone(),
                    port: nas.port,
                    user: nas.user.clone(),
                    pass: nas.pass.clone(),
                    protocol: nas.protocol,
                    base_folder: nas.base_folder.clone(),
                })
            }
        }
    }
}

/// Uniform upload contract every backend adapter implements.
///
/// Exactly two operations; protocol-specific concerns (authentication,
/// remote directory creation) stay encapsulated behind this seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Upload a local file to the given destination path, returning the
    /// URL the stored object is reachable at.
    async fn upload(&self, file: &Path, path: &str) -> Result<String, UploadError>;

    /// Single reachability probe against the backend. Never errors: any
    /// failure is reported as unreachable.
    async fn test_connection(&self) -> bool;
}

/// Build the adapter for the active backend variant.
pub fn create_backend(config: BackendConfig) -> Arc<dyn StorageBackend> {
    match config {
        BackendConfig::ObjectStorage {
            key_id,
            key,
            bucket_id,
            endpoint,
        } => Arc::new(ObjectStorageBackend::new(key_id, key, bucket_id, endpoint)),
        BackendConfig::Nas {
            host,
            port,
            user,
            pass,
            protocol,
            base_folder,
        } => Arc::new(NasBackend::new(host, port, user, pass, protocol, base_folder)),
    }
}
