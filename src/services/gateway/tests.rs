//! Tests for the gateway loop

use super::*;
use crate::domain::registry::DeviceRegistry;
use crate::domain::types::{ActuatorKind, ActuatorState, Channel, Device, SensorKind, UnknownCommandPolicy};
use crate::io::transport::TransportEvent;
use crate::services::session::Topics;
use crate::testing::{FakeHardware, FakeTransport, TransportOp};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

const DEVICE: &str = "gw-test";

/// Config handler that keeps what it receives
#[derive(Default)]
struct RecordingConfigHandler {
    updates: Mutex<Vec<Map<String, Value>>>,
}

#[async_trait]
impl ConfigUpdateHandler for RecordingConfigHandler {
    async fn on_config_update(&self, update: Map<String, Value>) {
        self.updates.lock().push(update);
    }
}

struct Harness {
    gateway: GatewayLoop,
    transport: Arc<FakeTransport>,
    hardware: Arc<FakeHardware>,
    config_handler: Arc<RecordingConfigHandler>,
    metrics: Arc<Metrics>,
    topics: Topics,
}

fn settings() -> LoopSettings {
    LoopSettings {
        reading_interval: Duration::from_secs(3600),
        tick: Duration::from_millis(10),
        metrics_interval: Duration::from_secs(3600),
        connect_timeout: Duration::from_millis(200),
        unreachable_warn: Duration::from_secs(60),
    }
}

fn harness_with(transport: (Arc<FakeTransport>, tokio::sync::mpsc::Receiver<TransportEvent>)) -> Harness {
    let (transport, events) = transport;
    let registry = Arc::new(
        DeviceRegistry::from_devices([
            Device::sensor("dht_temp", SensorKind::Temperature, 4u32),
            Device::sensor("dht_hum", SensorKind::Humidity, 5u32),
            Device::actuator("fan1", ActuatorKind::Fan, 17u32).with_external_id("A100"),
            Device::actuator("pump1", ActuatorKind::WaterPump, 27u32),
        ])
        .unwrap(),
    );

    let hardware = FakeHardware::new();
    hardware.set_reading(4u32, 24.1);
    hardware.set_reading(5u32, 61.0);

    let metrics = Arc::new(Metrics::new());
    let io_timeout = Duration::from_millis(50);
    let controller = Arc::new(ActuatorController::new(
        registry.clone(),
        hardware.clone(),
        UnknownCommandPolicy::Reject,
        io_timeout,
    ));
    let sampler = SensorSampler::new(registry, hardware.clone(), metrics.clone(), io_timeout);
    let topics = Topics::new("farm", DEVICE);
    let session = BrokerSession::new(transport.clone(), events, topics.clone(), metrics.clone())
        .with_offline_grace(Duration::ZERO);
    let config_handler = Arc::new(RecordingConfigHandler::default());

    let gateway = GatewayLoop::new(
        session,
        controller,
        sampler,
        config_handler.clone(),
        metrics.clone(),
        settings(),
    );

    Harness { gateway, transport, hardware, config_handler, metrics, topics }
}

fn harness() -> Harness {
    harness_with(FakeTransport::new())
}

async fn connected_harness() -> Harness {
    let mut h = harness();
    assert!(h.gateway.session.connect(Duration::from_secs(1)).await);
    h
}

fn command(actuator: &str, command: &str) -> TransportEvent {
    let payload = serde_json::json!({ "actuatorId": actuator, "command": command }).to_string();
    TransportEvent::MessageReceived {
        topic: format!("farm/{}/actuators/command", DEVICE),
        payload: payload.into(),
    }
}

fn spawn_loop(mut gateway: GatewayLoop, shutdown: watch::Receiver<bool>) -> JoinHandle<GatewayLoop> {
    tokio::spawn(async move {
        gateway.run(shutdown).await;
        gateway
    })
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_command_by_external_id_switches_named_actuator() {
    let mut h = connected_harness().await;

    h.gateway.on_event(command("A100", "on")).await;
    assert_eq!(h.gateway.controller.state_of("fan1").await, ActuatorState::On);
    assert_eq!(h.hardware.writes(), vec![(Channel::from(17u32), true)]);

    // Same state again re-asserts without error.
    h.gateway.on_event(command("fan1", "ON")).await;
    assert_eq!(h.gateway.controller.state_of("fan1").await, ActuatorState::On);
    assert_eq!(h.metrics.commands_applied(), 2);
    assert_eq!(h.metrics.commands_failed(), 0);
}

#[tokio::test]
async fn test_malformed_command_discarded_and_loop_continues() {
    let mut h = connected_harness().await;

    h.gateway
        .on_event(TransportEvent::MessageReceived {
            topic: h.topics.command.clone(),
            payload: br#"{"command": "ON"}"#.as_slice().into(),
        })
        .await;
    h.gateway.on_event(command("pump1", "ON")).await;

    assert_eq!(h.metrics.malformed_messages(), 1);
    assert_eq!(h.gateway.controller.state_of("fan1").await, ActuatorState::Off);
    assert_eq!(h.gateway.controller.state_of("pump1").await, ActuatorState::On);
}

#[tokio::test]
async fn test_rejected_commands_counted() {
    let mut h = connected_harness().await;

    h.gateway.on_event(command("nope", "ON")).await;
    h.gateway.on_event(command("fan1", "TOGGLE")).await;
    h.hardware.fail(27u32);
    h.gateway.on_event(command("pump1", "ON")).await;

    assert_eq!(h.metrics.commands_failed(), 3);
    assert_eq!(h.metrics.malformed_messages(), 1);
    assert_eq!(h.gateway.controller.state_of("fan1").await, ActuatorState::Off);
    assert_eq!(h.gateway.controller.state_of("pump1").await, ActuatorState::Off);
}

#[tokio::test]
async fn test_config_update_forwarded_to_handler() {
    let mut h = connected_harness().await;

    h.gateway
        .on_event(TransportEvent::MessageReceived {
            topic: h.topics.config.clone(),
            payload: br#"{"readingInterval": 60}"#.as_slice().into(),
        })
        .await;

    let updates = h.config_handler.updates.lock();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["readingInterval"], 60);
}

// ============================================================================
// Sampling
// ============================================================================

#[tokio::test]
async fn test_tick_skips_publish_while_disconnected() {
    let mut h = harness_with(FakeTransport::unreachable());
    h.gateway.session.connect(Duration::from_millis(10)).await;

    h.gateway.on_tick().await;
    assert!(h.transport.published_to(&h.topics.sensors).is_empty());
    assert_eq!(h.metrics.readings_skipped(), 1);

    h.transport.inject(TransportEvent::Connected).await;
    let event = h.gateway.session.next_event().await.unwrap();
    h.gateway.on_event(event).await;
    h.gateway.last_sample = None;

    h.gateway.on_tick().await;
    assert_eq!(h.transport.published_to(&h.topics.sensors).len(), 1);
    assert_eq!(h.metrics.readings_published(), 1);
}

#[tokio::test]
async fn test_tick_waits_for_reading_interval() {
    let mut h = connected_harness().await;

    h.gateway.on_tick().await;
    h.gateway.on_tick().await;
    h.gateway.on_tick().await;
    assert_eq!(h.transport.published_to(&h.topics.sensors).len(), 1);

    h.gateway.settings.reading_interval = Duration::ZERO;
    h.gateway.on_tick().await;
    assert_eq!(h.transport.published_to(&h.topics.sensors).len(), 2);
}

#[tokio::test]
async fn test_partial_sensor_failure_still_published() {
    let mut h = connected_harness().await;
    h.hardware.fail(5u32);

    h.gateway.on_tick().await;

    let published = h.transport.published_to(&h.topics.sensors);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["temperature"], 24.1);
    assert!(published[0].get("humidity").is_none());
    assert!(published[0]["timestamp"].is_string());
    assert_eq!(h.metrics.sensor_read_failures(), 1);
}

// ============================================================================
// Run loop and shutdown
// ============================================================================

#[tokio::test]
async fn test_run_applies_commands_and_shuts_down_in_order() {
    let h = harness();
    let transport = h.transport.clone();
    let injector = transport.injector();
    let controller = h.gateway.controller();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = spawn_loop(h.gateway, shutdown_rx);

    // First tick samples immediately once connected.
    let sensors_topic = h.topics.sensors.clone();
    wait_until(|| {
        let transport = transport.clone();
        let topic = sensors_topic.clone();
        async move { !transport.published_to(&topic).is_empty() }
    })
    .await;

    injector.send(command("A100", "ON")).await.unwrap();
    wait_until(|| {
        let controller = controller.clone();
        async move { controller.state_of("fan1").await == ActuatorState::On }
    })
    .await;

    shutdown_tx.send(true).unwrap();
    let gateway = task.await.unwrap();

    assert_eq!(controller.state_of("fan1").await, ActuatorState::Off);
    assert_eq!(h.hardware.writes().last(), Some(&(Channel::from(27u32), false)));
    assert!(!gateway.session().is_connected());

    let ops = transport.ops();
    let offline = ops
        .iter()
        .position(|op| {
            matches!(op, TransportOp::Publish { topic, payload, .. }
                if *topic == h.topics.status && payload["online"] == false)
        })
        .unwrap();
    let close = ops.iter().position(|op| *op == TransportOp::Close).unwrap();
    assert!(offline < close);
}

#[tokio::test]
async fn test_run_stops_when_shutdown_sender_dropped() {
    let h = harness_with(FakeTransport::unreachable());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = spawn_loop(h.gateway, shutdown_rx);

    drop(shutdown_tx);
    let gateway = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(gateway.controller().state_of("pump1").await, ActuatorState::Off);
}
