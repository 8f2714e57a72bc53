//! Farm gateway - bridges greenhouse sensors and relays to a cloud MQTT broker
//!
//! Samples sensors on a fixed interval, publishes snapshots, and applies
//! remote ON/OFF commands to actuators.
//!
//! Module structure:
//! - `domain/` - Devices, states, readings, registry, errors
//! - `io/` - External interfaces (hardware backends, MQTT transport)
//! - `services/` - Business logic (ActuatorController, SensorSampler, BrokerSession, GatewayLoop)
//! - `infra/` - Infrastructure (Config, Identity, Metrics)

use clap::Parser;
use farm_gateway::infra::{identity, Config, HardwareBackend, Metrics};
use farm_gateway::io::transport::qos_from_level;
use farm_gateway::io::{hardware, mqtt, MqttTransport};
use farm_gateway::services::session::offline_will;
use farm_gateway::services::{
    ActuatorController, BrokerSession, GatewayLoop, LoggingConfigHandler, LoopSettings,
    SensorSampler, Topics,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Farm gateway - sensor telemetry and actuator control over MQTT
#[derive(Parser, Debug)]
#[command(name = "farm-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Debug logging when RUST_LOG is not set
    #[arg(short, long)]
    verbose: bool,

    /// Use simulated hardware regardless of configuration
    #[arg(long)]
    simulate: bool,
}

/// Transport events buffered ahead of the gateway loop
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise INFO, or DEBUG with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(
        version = %env!("CARGO_PKG_VERSION"),
        git_hash = %env!("GIT_HASH"),
        "farm-gateway starting"
    );

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let mut config = Config::load_from_path(&config_path)?;
    if args.simulate {
        config = config.with_hardware_backend(HardwareBackend::Simulated);
    }

    let device_id = identity::resolve_device_id(config.device_id());
    let ip_address = identity::reported_ip_address();
    let topics = Topics::new(config.topic_prefix(), &device_id);
    let registry = Arc::new(config.registry()?);

    info!(
        config_file = %config.config_file(),
        device_id = %device_id,
        ip_address = %ip_address,
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        sensors = %registry.sensors().count(),
        actuators = %registry.actuators().count(),
        reading_interval_secs = %config.reading_interval_secs(),
        unknown_command = ?config.unknown_command(),
        "config_loaded"
    );

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let hardware = hardware::create(&config);
    let io_timeout = Duration::from_millis(config.io_timeout_ms());

    let controller = Arc::new(ActuatorController::new(
        registry.clone(),
        hardware.clone(),
        config.unknown_command(),
        io_timeout,
    ));
    // Relays may still be energized from a previous run.
    controller.all_off().await.log();

    let sampler = SensorSampler::new(registry, hardware, metrics.clone(), io_timeout);

    // MQTT transport with a retained offline last-will. The will is fixed once
    // the options are built; live status messages look the address up each time.
    let mut options = mqtt::options_from_config(&config, &mqtt::client_id(&device_id));
    options.set_last_will(offline_will(&topics, Some(&ip_address))?);
    let (transport, events) = MqttTransport::new(
        options,
        Duration::from_millis(config.reconnect_delay_ms()),
        EVENT_CHANNEL_CAPACITY,
    );

    let session = BrokerSession::new(Arc::new(transport), events, topics, metrics.clone())
        .with_qos(qos_from_level(config.mqtt_qos()))
        .with_offline_grace(Duration::from_millis(config.offline_grace_ms()));

    let mut gateway = GatewayLoop::new(
        session,
        controller,
        sampler,
        Arc::new(LoggingConfigHandler),
        metrics,
        LoopSettings::from_config(&config),
    );

    // Handle shutdown on Ctrl+C / SIGTERM
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run the gateway loop - returns after the shutdown sequence
    gateway.run(shutdown_rx).await;

    info!("farm-gateway shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "sigterm_handler_unavailable");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
