//! Pulse-driven capture service for production lines.
//!
//! Wires the sensor poll loop, the capture cycle controller, the pending
//! image queue and the upload backend together, then runs until SIGINT or
//! SIGTERM.
//!
//! Configuration is loaded from `config/pulsecap.*`, `/etc/pulsecap/` and
//! environment variables prefixed with `PULSECAP__`.

use anyhow::Context;
use pulsecap::{
    create_backend, spawn_connectivity_poll, spawn_sensor_loop, AutoCaptureController,
    BackendConfig, Config, ConnectivityGate, PendingImageStore, ProductionInfo, SimulatedSensor,
    SpoolCamera, UploadOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_logging(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.backend.kind,
        "starting capture service"
    );

    let backend_config =
        BackendConfig::from_settings(&config.backend).context("invalid backend configuration")?;
    let backend = create_backend(backend_config);

    let store = Arc::new(
        PendingImageStore::open(&config.storage.queue_file)
            .await
            .context("failed to open pending-image store")?,
    );

    let gate = Arc::new(ConnectivityGate::new(
        backend.clone(),
        config.connectivity_timeout(),
    ));
    let orchestrator = Arc::new(UploadOrchestrator::new(
        backend,
        gate.clone(),
        store.clone(),
        config.storage.spool_dir.join("tmp"),
    ));

    let camera = Arc::new(SpoolCamera::new(&config.storage.spool_dir));
    let controller = Arc::new(AutoCaptureController::new(
        camera,
        store,
        orchestrator,
        ProductionInfo::from(&config.production),
        config.sensor.polarity,
        &config.cycle,
        config.calibration_delay(),
    ));

    let (sensor, sensor_task) = SimulatedSensor::spawn(
        Duration::from_millis(config.sensor.simulated_pulse_width_ms),
        Duration::from_millis(config.sensor.simulated_interval_ms),
    );

    let (_status_rx, poll_task) = spawn_connectivity_poll(
        gate,
        Duration::from_millis(config.cycle.connectivity_poll_ms),
    );
    let watchdog_task = controller.clone().spawn_idle_watchdog();

    controller.activate().await;
    let loop_task = spawn_sensor_loop(
        sensor,
        controller.clone(),
        Duration::from_millis(config.sensor.poll_period_ms),
    );

    info!("capture service started");
    shutdown_signal().await;
    info!("shutting down capture service");

    controller.deactivate().await;
    loop_task.abort();
    sensor_task.abort();
    poll_task.abort();
    watchdog_task.abort();

    Ok(())
}

fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
