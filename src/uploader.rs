use crate::backend::StorageBackend;
use crate::connectivity::ConnectivityGate;
use crate::store::{CapturedImage, PendingImageStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Progress of the current (or last) upload batch, published over a watch
/// channel for observability surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Idle,
    /// Percentage of the batch processed so far
    Uploading(u8),
    Success,
    /// Backend unreachable: the queue was discarded, not retried
    NoConnection,
    Failed(String),
}

/// Result of one drain call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// The batch ran to completion (possibly with per-item failures)
    Completed(DrainReport),
    /// The backend was unreachable; every queued image was discarded
    NoConnection { discarded: usize },
    /// Another drain was already in flight; this request was ignored
    AlreadyRunning,
}

/// What a completed batch did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Successfully uploaded images, each with its backend URL recorded
    pub uploaded: Vec<CapturedImage>,
    /// Per-item failures, logged and skipped
    pub errors: Vec<String>,
}

impl DrainReport {
    pub fn count(&self) -> usize {
        self.uploaded.len()
    }
}

/// Sequentially flushes the pending queue to the active backend.
///
/// Items are processed strictly oldest-first, one at a time. The durable
/// queue stays intact while the batch runs and is cleared only at the end,
/// so a crash mid-batch leaves the remaining items to be re-flushed on the
/// next activation. Per-item failures are logged and skipped; an
/// unreachable backend discards the whole batch up front. One drain may be
/// in flight at a time; concurrent requests are ignored.
pub struct UploadOrchestrator {
    backend: Arc<dyn StorageBackend>,
    gate: Arc<ConnectivityGate>,
    store: Arc<PendingImageStore>,
    /// Staging area for transient per-upload copies
    scratch_dir: PathBuf,
    /// Held for the duration of one drain; try-locked to reject reentry
    drain_lock: Mutex<()>,
    status_tx: watch::Sender<UploadStatus>,
}

impl UploadOrchestrator {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        gate: Arc<ConnectivityGate>,
        store: Arc<PendingImageStore>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        let (status_tx, _) = watch::channel(UploadStatus::Idle);
        Self {
            backend,
            gate,
            store,
            scratch_dir: scratch_dir.into(),
            drain_lock: Mutex::new(()),
            status_tx,
        }
    }

    /// Subscribe to batch progress updates.
    pub fn subscribe_status(&self) -> watch::Receiver<UploadStatus> {
        self.status_tx.subscribe()
    }

    /// Flush every pending image to the backend.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> DrainOutcome {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("drain already in flight, request ignored");
            return DrainOutcome::AlreadyRunning;
        };

        // Non-clearing snapshot: the queue must survive a crash mid-batch
        let batch = self.store.snapshot_oldest_first().await;

        if batch.is_empty() {
            debug!("no pending images to upload");
            return DrainOutcome::Completed(DrainReport::default());
        }

        info!(total = batch.len(), "starting upload batch");

        if !self.gate.check().await {
            // Deliberate policy: an unreachable backend discards the whole
            // queue instead of letting local storage grow without bound.
            warn!(
                discarded = batch.len(),
                "backend unreachable, discarding queued images"
            );
            for image in &batch {
                remove_quietly(&image.uri).await;
            }
            if let Err(e) = self.store.clear().await {
                warn!(error = %e, "could not persist discarded queue");
            }
            self.status_tx.send_replace(UploadStatus::NoConnection);
            return DrainOutcome::NoConnection {
                discarded: batch.len(),
            };
        }

        let total = batch.len();
        let mut report = DrainReport::default();

        for (index, mut image) in batch.into_iter().enumerate() {
            match self.upload_one(&image).await {
                Ok(url) => {
                    image.backend_url = Some(url);
                    remove_quietly(&image.uri).await;
                    report.uploaded.push(image);
                }
                Err(e) => {
                    // Skipped, not retried: the item is forfeited
                    error!(
                        index = index + 1,
                        total,
                        uri = %image.uri.display(),
                        error = %e,
                        "upload failed, continuing with remaining images"
                    );
                    report.errors.push(e);
                }
            }

            let progress = (((index + 1) * 100) / total) as u8;
            self.status_tx.send_replace(UploadStatus::Uploading(progress));
        }

        // The queue ends every batch empty, even for items that failed
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "could not persist cleared queue");
        }

        info!(
            uploaded = report.count(),
            failed = report.errors.len(),
            "upload batch finished"
        );
        self.status_tx.send_replace(UploadStatus::Success);

        DrainOutcome::Completed(report)
    }

    /// Upload a single image through a transient local copy.
    async fn upload_one(&self, image: &CapturedImage) -> Result<String, String> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| format!("scratch dir: {e}"))?;

        let scratch = self.scratch_dir.join(format!("transfer_{}.jpg", Uuid::new_v4()));
        tokio::fs::copy(&image.uri, &scratch)
            .await
            .map_err(|e| format!("materialize {}: {e}", image.uri.display()))?;

        let remote = image.production.remote_path();
        let result = self
            .backend
            .upload(&scratch, &remote)
            .await
            .map_err(|e| e.to_string());

        remove_quietly(&scratch).await;
        result
    }
}

async fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockStorageBackend, UploadError};
    use crate::production::ProductionInfo;
    use crate::store::new_capture;
    use std::time::Duration;

    async fn store_with(dir: &tempfile::TempDir, count: usize) -> Arc<PendingImageStore> {
        let store = PendingImageStore::open(dir.path().join("pending.json"))
            .await
            .unwrap();
        for i in 0..count {
            let uri = dir.path().join(format!("img_{i}.jpg"));
            tokio::fs::write(&uri, b"frame").await.unwrap();
            store
                .append(new_capture(uri, ProductionInfo::default()))
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    fn orchestrator(
        backend: MockStorageBackend,
        store: Arc<PendingImageStore>,
        dir: &tempfile::TempDir,
    ) -> UploadOrchestrator {
        let backend: Arc<dyn StorageBackend> = Arc::new(backend);
        let gate = Arc::new(ConnectivityGate::new(
            backend.clone(),
            Duration::from_secs(1),
        ));
        UploadOrchestrator::new(backend, gate, store, dir.path().join("scratch"))
    }

    #[tokio::test]
    async fn empty_queue_drain_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, 0).await;
        let backend = MockStorageBackend::new();
        let orchestrator = orchestrator(backend, store, &dir);

        match orchestrator.drain().await {
            DrainOutcome::Completed(report) => {
                assert_eq!(report.count(), 0);
                assert!(report.errors.is_empty());
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_batch_records_urls_and_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, 3).await;

        let mut backend = MockStorageBackend::new();
        backend.expect_test_connection().return_const(true);
        backend
            .expect_upload()
            .times(3)
            .returning(|_, path| Ok(format!("https://cdn.example/file/bucket/{path}")));

        let orchestrator = orchestrator(backend, store.clone(), &dir);
        let outcome = orchestrator.drain().await;

        match outcome {
            DrainOutcome::Completed(report) => {
                assert_eq!(report.count(), 3);
                assert!(report.uploaded.iter().all(|i| i
                    .backend_url
                    .as_deref()
                    .is_some_and(|u| !u.is_empty())));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(store.snapshot_count().await, 0);
        // Originals are deleted after upload
        assert!(!dir.path().join("img_0.jpg").exists());
    }

    #[tokio::test]
    async fn unreachable_backend_discards_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, 2).await;

        let mut backend = MockStorageBackend::new();
        backend.expect_test_connection().return_const(false);
        backend.expect_upload().times(0);

        let orchestrator = orchestrator(backend, store.clone(), &dir);
        let outcome = orchestrator.drain().await;

        assert_eq!(outcome, DrainOutcome::NoConnection { discarded: 2 });
        assert_eq!(store.snapshot_count().await, 0);
        assert!(!dir.path().join("img_0.jpg").exists());
        assert!(!dir.path().join("img_1.jpg").exists());
        assert_eq!(*orchestrator.subscribe_status().borrow(), UploadStatus::NoConnection);
    }

    #[tokio::test]
    async fn per_item_failure_is_skipped_and_store_still_ends_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, 3).await;

        let mut backend = MockStorageBackend::new();
        backend.expect_test_connection().return_const(true);
        let mut call = 0;
        backend.expect_upload().times(3).returning(move |_, path| {
            call += 1;
            if call == 2 {
                Err(UploadError::Transfer("connection reset".into()))
            } else {
                Ok(format!("https://cdn.example/file/bucket/{path}"))
            }
        });

        let orchestrator = orchestrator(backend, store.clone(), &dir);
        match orchestrator.drain().await {
            DrainOutcome::Completed(report) => {
                assert_eq!(report.count(), 2);
                assert_eq!(report.errors.len(), 1);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(store.snapshot_count().await, 0);
    }

    struct DelayedBackend {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl StorageBackend for DelayedBackend {
        async fn upload(
            &self,
            _file: &std::path::Path,
            path: &str,
        ) -> Result<String, UploadError> {
            tokio::time::sleep(self.delay).await;
            Ok(format!("https://cdn.example/{path}"))
        }

        async fn test_connection(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn queue_stays_durable_until_batch_completes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, 1).await;

        let backend: Arc<dyn StorageBackend> = Arc::new(DelayedBackend {
            delay: Duration::from_millis(500),
        });
        let gate = Arc::new(ConnectivityGate::new(
            backend.clone(),
            Duration::from_secs(1),
        ));
        let orchestrator = Arc::new(UploadOrchestrator::new(
            backend,
            gate,
            store.clone(),
            dir.path().join("scratch"),
        ));

        let draining = Arc::clone(&orchestrator);
        let batch = tokio::spawn(async move { draining.drain().await });
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Mid-batch: the item is still queued and still on disk, so a crash
        // here would re-flush it on the next activation
        assert_eq!(store.snapshot_count().await, 1);
        let bytes = tokio::fs::read(dir.path().join("pending.json")).await.unwrap();
        let persisted: std::collections::BTreeMap<usize, CapturedImage> =
            serde_json::from_slice(&bytes).unwrap();
        assert_eq!(persisted.len(), 1);

        match batch.await.unwrap() {
            DrainOutcome::Completed(report) => assert_eq!(report.count(), 1),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(store.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred_percent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, 2).await;

        let mut backend = MockStorageBackend::new();
        backend.expect_test_connection().return_const(true);
        backend
            .expect_upload()
            .returning(|_, path| Ok(format!("https://cdn.example/{path}")));

        let orchestrator = orchestrator(backend, store, &dir);
        let status = orchestrator.subscribe_status();
        orchestrator.drain().await;

        // Final state is Success; Uploading(100) was published on the way
        assert_eq!(*status.borrow(), UploadStatus::Success);
    }
}
