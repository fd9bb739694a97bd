use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the capture controller
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Sensor configuration
    #[serde(default)]
    pub sensor: SensorConfig,
    /// Capture cycle configuration
    #[serde(default)]
    pub cycle: CycleConfig,
    /// Local storage paths
    #[serde(default)]
    pub storage: StorageConfig,
    /// Active upload backend
    pub backend: BackendSettings,
    /// Production run information embedded into every capture
    #[serde(default)]
    pub production: ProductionConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Edge polarity of the detection signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Emit on true -> false transitions (default)
    Falling,
    /// Emit on false -> true transitions
    Rising,
}

/// Sensor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// Which edge of the detection signal triggers a pulse
    #[serde(default = "default_polarity")]
    pub polarity: Polarity,
    /// Delay applied before capture, for sensor/shutter alignment
    #[serde(default)]
    pub calibration_delay_ms: u64,
    /// Polling period of the sensor loop in milliseconds
    #[serde(default = "default_poll_period_ms")]
    pub poll_period_ms: u64,
    /// Gap between simulated pulses in milliseconds
    #[serde(default = "default_simulated_interval_ms")]
    pub simulated_interval_ms: u64,
    /// Width of each simulated pulse in milliseconds
    #[serde(default = "default_simulated_pulse_width_ms")]
    pub simulated_pulse_width_ms: u64,
}

/// Capture cycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CycleConfig {
    /// Minimum interval between accepted pulses in milliseconds
    #[serde(default = "default_min_pulse_interval_ms")]
    pub min_pulse_interval_ms: u64,
    /// Gap above which the cycle is considered stale and reset to Wait
    #[serde(default = "default_max_pulse_gap_ms")]
    pub max_pulse_gap_ms: u64,
    /// Idle time without an accepted pulse before the watchdog resets state
    #[serde(default = "default_idle_reset_ms")]
    pub idle_reset_ms: u64,
    /// Period of the background connectivity probe in milliseconds
    #[serde(default = "default_connectivity_poll_ms")]
    pub connectivity_poll_ms: u64,
    /// Timeout for a single connectivity probe in milliseconds
    #[serde(default = "default_connectivity_timeout_ms")]
    pub connectivity_timeout_ms: u64,
}

/// Local storage paths
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory where captured images are spooled before upload
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    /// File backing the pending-image queue
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,
}

/// Which backend is active plus its credentials
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    /// Active backend: "object_storage" or "nas"
    pub kind: BackendKind,
    /// Object-storage credentials (required when kind = object_storage)
    pub object_storage: Option<ObjectStorageSettings>,
    /// NAS connection settings (required when kind = nas)
    pub nas: Option<NasSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    ObjectStorage,
    Nas,
}

/// Credentials for a B2-compatible object storage bucket
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageSettings {
    pub key_id: String,
    pub key: String,
    pub bucket_id: String,
    /// API endpoint used for the authorize call
    #[serde(default = "default_object_storage_endpoint")]
    pub endpoint: String,
}

/// Transfer protocol for NAS uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NasProtocol {
    Ftp,
    Sftp,
}

/// Connection settings for a NAS share
#[derive(Debug, Clone, Deserialize)]
pub struct NasSettings {
    pub host: String,
    #[serde(default = "default_nas_port")]
    pub port: u16,
    pub user: String,
    pub pass: String,
    #[serde(default = "default_nas_protocol")]
    pub protocol: NasProtocol,
    /// Folder every destination path is rooted under
    #[serde(default = "default_nas_base_folder")]
    pub base_folder: String,
}

/// Production run information captured with every image
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductionConfig {
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub color_tag: String,
    #[serde(default)]
    pub operator_name: String,
}

// Default value functions
fn default_service_name() -> String {
    "pulsecap".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_polarity() -> Polarity {
    Polarity::Falling
}

fn default_poll_period_ms() -> u64 {
    100
}

fn default_simulated_interval_ms() -> u64 {
    3000
}

fn default_simulated_pulse_width_ms() -> u64 {
    1000
}

fn default_min_pulse_interval_ms() -> u64 {
    500
}

fn default_max_pulse_gap_ms() -> u64 {
    10_000
}

fn default_idle_reset_ms() -> u64 {
    300_000
}

fn default_connectivity_poll_ms() -> u64 {
    30_000
}

fn default_connectivity_timeout_ms() -> u64 {
    10_000
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("spool")
}

fn default_queue_file() -> PathBuf {
    PathBuf::from("spool/pending.json")
}

fn default_object_storage_endpoint() -> String {
    "https://api.backblazeb2.com".to_string()
}

fn default_nas_port() -> u16 {
    22
}

fn default_nas_protocol() -> NasProtocol {
    NasProtocol::Sftp
}

fn default_nas_base_folder() -> String {
    "pulsecap".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "pulsecap")?
            .set_default("service.log_level", "info")?
            .add_source(config::File::with_name("config/pulsecap").required(false))
            .add_source(config::File::with_name("/etc/pulsecap/pulsecap").required(false))
            // PULSECAP__BACKEND__KIND -> backend.kind
            .add_source(
                config::Environment::with_prefix("PULSECAP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the calibration delay as a Duration
    pub fn calibration_delay(&self) -> Duration {
        Duration::from_millis(self.sensor.calibration_delay_ms)
    }

    /// Get the connectivity probe timeout as a Duration
    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle.connectivity_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            polarity: default_polarity(),
            calibration_delay_ms: 0,
            poll_period_ms: default_poll_period_ms(),
            simulated_interval_ms: default_simulated_interval_ms(),
            simulated_pulse_width_ms: default_simulated_pulse_width_ms(),
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            min_pulse_interval_ms: default_min_pulse_interval_ms(),
            max_pulse_gap_ms: default_max_pulse_gap_ms(),
            idle_reset_ms: default_idle_reset_ms(),
            connectivity_poll_ms: default_connectivity_poll_ms(),
            connectivity_timeout_ms: default_connectivity_timeout_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            spool_dir: default_spool_dir(),
            queue_file: default_queue_file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cycle = CycleConfig::default();
        assert_eq!(cycle.min_pulse_interval_ms, 500);
        assert_eq!(cycle.max_pulse_gap_ms, 10_000);
        assert_eq!(cycle.idle_reset_ms, 300_000);
    }

    #[test]
    fn test_polarity_default_is_falling() {
        assert_eq!(SensorConfig::default().polarity, Polarity::Falling);
    }
}
