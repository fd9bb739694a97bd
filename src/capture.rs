use crate::production::ProductionInfo;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Errors from the capture collaborator.
///
/// None of these are fatal to the controller: a failed capture is logged and
/// the cycle continues from its current state.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("camera permission denied: {0}")]
    Permission(String),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// Capture capability: produces one image per invocation.
///
/// The physical mechanism (camera HAL, intent, test double) lives behind
/// this seam; the controller only sees the resulting image reference.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Take one photo for the given production snapshot, returning the path
    /// of the stored image.
    async fn capture(&self, info: &ProductionInfo) -> Result<PathBuf, CaptureError>;
}

/// Camera that spools JPEG frames into a local directory.
///
/// Stands in for the real capture hardware: each invocation writes a frame
/// file named by timestamp + id into the spool directory.
pub struct SpoolCamera {
    spool_dir: PathBuf,
}

impl SpoolCamera {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }
}

#[async_trait]
impl Camera for SpoolCamera {
    #[instrument(skip(self, info))]
    async fn capture(&self, info: &ProductionInfo) -> Result<PathBuf, CaptureError> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;

        let filename = format!(
            "{}_{}.jpg",
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4()
        );
        let path = self.spool_dir.join(filename);

        // Minimal JPEG payload: SOI + EOI markers around the metadata line,
        // enough for transfer paths that expect a non-empty image file.
        let mut payload = vec![0xFF, 0xD8];
        payload.extend_from_slice(info.metadata_line().as_bytes());
        payload.extend_from_slice(&[0xFF, 0xD9]);

        tokio::fs::write(&path, payload).await?;
        debug!(path = %path.display(), "frame captured to spool");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_writes_one_file_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SpoolCamera::new(dir.path());
        let info = ProductionInfo::default();

        let first = camera.capture(&info).await.unwrap();
        let second = camera.capture(&info).await.unwrap();

        assert!(first.exists());
        assert!(second.exists());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn captured_file_is_framed_as_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SpoolCamera::new(dir.path());
        let path = camera.capture(&ProductionInfo::default()).await.unwrap();

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }
}
