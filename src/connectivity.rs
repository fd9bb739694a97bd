use crate::backend::StorageBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Last known reachability of the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Unknown,
    Connected,
    Disconnected,
}

/// Pre-flight reachability check against the active backend.
///
/// One probe per call, bounded by the configured timeout; the caller
/// suspends until the probe resolves. The gate never errors: a timeout or
/// probe failure is simply "unreachable".
pub struct ConnectivityGate {
    backend: Arc<dyn StorageBackend>,
    timeout: Duration,
}

impl ConnectivityGate {
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Probe the backend once. `false` gates the upload batch off and
    /// triggers the discard policy in the orchestrator.
    pub async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.backend.test_connection()).await {
            Ok(reachable) => {
                debug!(reachable, "connectivity probe finished");
                reachable
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "connectivity probe timed out");
                false
            }
        }
    }
}

/// Spawn the periodic connectivity poll, publishing status over a watch
/// channel for observability surfaces.
pub fn spawn_connectivity_poll(
    gate: Arc<ConnectivityGate>,
    period: Duration,
) -> (watch::Receiver<ServerStatus>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = watch::channel(ServerStatus::Unknown);

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let status = if gate.check().await {
                ServerStatus::Connected
            } else {
                ServerStatus::Disconnected
            };

            if *tx.borrow() != status {
                info!(status = ?status, "backend connectivity changed");
            }
            if tx.send(status).is_err() {
                break;
            }
        }
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockStorageBackend;

    #[tokio::test]
    async fn check_reports_backend_result() {
        let mut backend = MockStorageBackend::new();
        backend.expect_test_connection().return_const(true);

        let gate = ConnectivityGate::new(Arc::new(backend), Duration::from_secs(1));
        assert!(gate.check().await);
    }

    struct SlowBackend;

    #[async_trait::async_trait]
    impl StorageBackend for SlowBackend {
        async fn upload(
            &self,
            _file: &std::path::Path,
            _path: &str,
        ) -> Result<String, crate::backend::UploadError> {
            unreachable!("probe test never uploads")
        }

        async fn test_connection(&self) -> bool {
            tokio::time::sleep(Duration::from_secs(5)).await;
            true
        }
    }

    #[tokio::test]
    async fn slow_probe_counts_as_unreachable() {
        let gate = ConnectivityGate::new(Arc::new(SlowBackend), Duration::from_millis(20));
        assert!(!gate.check().await);
    }
}
