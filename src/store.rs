use crate::production::ProductionInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A captured-but-not-yet-uploaded image plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedImage {
    /// Location of the captured image on local disk
    pub uri: PathBuf,
    /// Free-text metadata recorded at capture time
    pub metadata: String,
    /// Backend URL, set only after a successful upload
    pub backend_url: Option<String>,
    /// Production snapshot taken at capture time
    pub production: ProductionInfo,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable ordered queue of pending images.
///
/// Images are held newest-first (index 0 is the most recent capture, the
/// order a gallery displays them in) and drained oldest-first (the order
/// uploads must happen in). The backing file is a JSON map keyed by ordinal
/// index, rewritten on every mutation; all access goes through one async
/// mutex so appends and drains are mutually exclusive.
pub struct PendingImageStore {
    inner: Mutex<Inner>,
}

struct Inner {
    /// Newest-first
    images: Vec<CapturedImage>,
    path: PathBuf,
}

impl PendingImageStore {
    /// Open the store, loading any queue persisted by a previous run.
    /// A missing file starts an empty queue; a corrupt file is logged and
    /// discarded rather than blocking startup.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let images = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<usize, CapturedImage>>(&bytes) {
                Ok(map) => map.into_values().collect::<Vec<_>>(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding corrupt queue file");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            pending = images.len(),
            "pending-image store opened"
        );

        Ok(Self {
            inner: Mutex::new(Inner { images, path }),
        })
    }

    /// Append a new capture at the head of the queue (newest-first).
    pub async fn append(&self, image: CapturedImage) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.images.insert(0, image);
        debug!(pending = inner.images.len(), "image appended to queue");
        inner.persist().await
    }

    /// Atomically take every pending image in upload order (oldest first),
    /// leaving the store empty.
    pub async fn drain_all(&self) -> Result<Vec<CapturedImage>, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut drained = std::mem::take(&mut inner.images);
        drained.reverse();
        inner.persist().await?;
        Ok(drained)
    }

    /// Discard every pending image.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let dropped = inner.images.len();
        inner.images.clear();
        if dropped > 0 {
            info!(dropped, "pending-image queue cleared");
        }
        inner.persist().await
    }

    /// Copy of the queue in upload order (oldest first), leaving the queue
    /// and its backing file untouched.
    pub async fn snapshot_oldest_first(&self) -> Vec<CapturedImage> {
        let inner = self.inner.lock().await;
        let mut images = inner.images.clone();
        images.reverse();
        images
    }

    /// Number of images currently pending.
    pub async fn snapshot_count(&self) -> usize {
        self.inner.lock().await.images.len()
    }

    /// Copy of the queue in display order (newest first).
    pub async fn snapshot(&self) -> Vec<CapturedImage> {
        self.inner.lock().await.images.clone()
    }
}

impl Inner {
    /// Rewrite the backing file through a sibling temp file and rename, so
    /// a crash mid-write never leaves a truncated queue behind.
    async fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let map: BTreeMap<usize, &CapturedImage> =
            self.images.iter().enumerate().collect();
        let bytes = serde_json::to_vec_pretty(&map)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Build a [`CapturedImage`] record for a freshly captured frame.
pub fn new_capture(uri: impl Into<PathBuf>, production: ProductionInfo) -> CapturedImage {
    let metadata = production.metadata_line();
    CapturedImage {
        uri: uri.into(),
        metadata,
        backend_url: None,
        production,
        captured_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: &str) -> CapturedImage {
        new_capture(format!("/tmp/{tag}.jpg"), ProductionInfo::default())
    }

    async fn temp_store(dir: &tempfile::TempDir) -> PendingImageStore {
        PendingImageStore::open(dir.path().join("pending.json"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn append_is_newest_first_drain_is_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;

        store.append(image("a")).await.unwrap();
        store.append(image("b")).await.unwrap();
        store.append(image("c")).await.unwrap();

        let display = store.snapshot().await;
        assert_eq!(display[0].uri, PathBuf::from("/tmp/c.jpg"));

        let drained = store.drain_all().await.unwrap();
        let uris: Vec<_> = drained.iter().map(|i| i.uri.clone()).collect();
        assert_eq!(
            uris,
            vec![
                PathBuf::from("/tmp/a.jpg"),
                PathBuf::from("/tmp/b.jpg"),
                PathBuf::from("/tmp/c.jpg")
            ]
        );
        assert_eq!(store.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");

        {
            let store = PendingImageStore::open(&path).await.unwrap();
            store.append(image("first")).await.unwrap();
            store.append(image("second")).await.unwrap();
        }

        let reopened = PendingImageStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot_count().await, 2);
        let drained = reopened.drain_all().await.unwrap();
        assert_eq!(drained[0].uri, PathBuf::from("/tmp/first.jpg"));
    }

    #[tokio::test]
    async fn clear_empties_store_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        let store = PendingImageStore::open(&path).await.unwrap();

        store.append(image("x")).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.snapshot_count().await, 0);

        let reopened = PendingImageStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = PendingImageStore::open(&path).await.unwrap();
        assert_eq!(store.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn oldest_first_snapshot_leaves_queue_intact() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;

        store.append(image("a")).await.unwrap();
        store.append(image("b")).await.unwrap();

        let snapshot = store.snapshot_oldest_first().await;
        assert_eq!(snapshot[0].uri, PathBuf::from("/tmp/a.jpg"));
        assert_eq!(snapshot[1].uri, PathBuf::from("/tmp/b.jpg"));
        // Still queued, still on disk
        assert_eq!(store.snapshot_count().await, 2);
        let reopened = PendingImageStore::open(dir.path().join("pending.json"))
            .await
            .unwrap();
        assert_eq!(reopened.snapshot_count().await, 2);
    }

    #[tokio::test]
    async fn persist_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        let store = PendingImageStore::open(&path).await.unwrap();

        store.append(image("a")).await.unwrap();
        store.append(image("b")).await.unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("pending.json.tmp").exists());
    }

    #[tokio::test]
    async fn drain_on_empty_store_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        assert!(store.drain_all().await.unwrap().is_empty());
    }
}
