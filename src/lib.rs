//! Pulse-driven capture controller for production lines.
//!
//! A photoelectric sensor in front of a conveyor produces a boolean
//! detection signal. This crate debounces that signal into discrete pulses
//! and drives a three-phase cycle from them:
//!
//! ```text
//! Sensor -> EdgeDebouncer -> AutoCaptureController
//!                                |-- Capture: Camera -> PendingImageStore
//!                                `-- Upload:  UploadOrchestrator -> StorageBackend
//! ```
//!
//! Each accepted pulse advances the cycle by exactly one phase. Captured
//! frames are spooled into a durable local queue and flushed sequentially
//! to the active backend (B2-compatible object storage, or a NAS over
//! FTP/SFTP). An unreachable backend discards the queue rather than letting
//! local storage grow without bound.

pub mod backend;
pub mod capture;
pub mod config;
pub mod connectivity;
pub mod controller;
pub mod debounce;
pub mod production;
pub mod sensor;
pub mod store;
pub mod uploader;

pub use backend::{create_backend, BackendConfig, StorageBackend, UploadError};
pub use capture::{Camera, CaptureError, SpoolCamera};
pub use config::Config;
pub use connectivity::{spawn_connectivity_poll, ConnectivityGate, ServerStatus};
pub use controller::{AutoCaptureController, AutoState};
pub use debounce::{EdgeDebouncer, PulseEvent};
pub use production::ProductionInfo;
pub use sensor::{spawn_sensor_loop, SignalSource, SimulatedSensor};
pub use store::{CapturedImage, PendingImageStore, StoreError};
pub use uploader::{DrainOutcome, DrainReport, UploadOrchestrator, UploadStatus};
