//! Broker session - one logical connection to the cloud broker
//!
//! State machine: Disconnected -> Connecting -> Connected -> Disconnected.
//! Reconnection belongs to the transport; the session reacts to its events:
//! on every `Connected` it subscribes to the command and config topics and
//! only then announces itself online.
//!
//! Event handling is split in two so the gateway loop can `select!` on
//! [`BrokerSession::next_event`] (cancel-safe) and run
//! [`BrokerSession::handle_event`] to completion outside the select.

use crate::domain::error::{error_chain, GatewayError, TransportError};
use crate::domain::types::{serialize_timestamp, SensorReading, SessionState};
use crate::infra::identity;
use crate::infra::metrics::Metrics;
use crate::io::transport::{Transport, TransportEvent};
use chrono::{DateTime, Utc};
use rumqttc::{LastWill, QoS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const DEFAULT_OFFLINE_GRACE: Duration = Duration::from_millis(500);

/// Topic names for one gateway, `{prefix}/{device_id}/...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub sensors: String,
    pub status: String,
    pub command: String,
    pub config: String,
}

impl Topics {
    pub fn new(prefix: &str, device_id: &str) -> Self {
        let base = format!("{}/{}", prefix.trim_end_matches('/'), device_id);
        Self {
            sensors: format!("{}/sensors", base),
            status: format!("{}/status", base),
            command: format!("{}/actuators/command", base),
            config: format!("{}/config", base),
        }
    }
}

/// Body of a `/status` message
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub online: bool,
    pub ip_address: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl StatusPayload {
    /// Without an explicit address the current one is looked up now
    pub fn new(online: bool, ip_address: Option<&str>) -> Self {
        Self {
            online,
            ip_address: ip_address.map_or_else(identity::reported_ip_address, str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// Retained offline status the broker publishes if the gateway drops off
pub fn offline_will(topics: &Topics, ip_address: Option<&str>) -> Result<LastWill, TransportError> {
    let payload = serde_json::to_vec(&StatusPayload::new(false, ip_address))?;
    Ok(LastWill::new(&topics.status, payload, QoS::AtLeastOnce, true))
}

/// Remote actuator command, `{"actuatorId": "...", "command": "..."}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub actuator_id: String,
    pub command: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommand {
    actuator_id: Option<String>,
    command: Option<String>,
}

fn required(value: Option<String>, field: &str) -> Result<String, GatewayError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(GatewayError::MalformedMessage(format!("missing or blank {}", field))),
    }
}

/// Parse a command payload; anything but a JSON object is rejected, extra fields are ignored
pub fn parse_command(payload: &[u8]) -> Result<ActuatorCommand, GatewayError> {
    let map = match serde_json::from_slice(payload) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(GatewayError::MalformedMessage(format!(
                "command payload is not an object: {}",
                other
            )))
        }
        Err(e) => return Err(GatewayError::MalformedMessage(format!("command payload: {}", e))),
    };
    let raw: RawCommand = serde_json::from_value(Value::Object(map))
        .map_err(|e| GatewayError::MalformedMessage(format!("command payload: {}", e)))?;
    Ok(ActuatorCommand {
        actuator_id: required(raw.actuator_id, "actuatorId")?,
        command: required(raw.command, "command")?,
    })
}

/// Parse a config payload; anything but a JSON object is rejected
pub fn parse_config_update(payload: &[u8]) -> Result<Map<String, Value>, GatewayError> {
    match serde_json::from_slice(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(GatewayError::MalformedMessage(format!(
            "config payload is not an object: {}",
            other
        ))),
        Err(e) => Err(GatewayError::MalformedMessage(format!("config payload: {}", e))),
    }
}

/// Inbound message the gateway loop has to act on
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Command(ActuatorCommand),
    ConfigUpdate(Map<String, Value>),
}

pub struct BrokerSession {
    transport: Arc<dyn Transport>,
    events: mpsc::Receiver<TransportEvent>,
    /// Events received while `connect` was waiting, replayed first
    deferred: VecDeque<TransportEvent>,
    topics: Topics,
    qos: QoS,
    offline_grace: Duration,
    /// Fixed address for status messages; looked up per publish when unset
    ip_address: Option<String>,
    state_tx: watch::Sender<SessionState>,
    /// Start of the current outage; `None` while connected
    disconnected_since: Option<Instant>,
    metrics: Arc<Metrics>,
}

impl BrokerSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        topics: Topics,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            events,
            deferred: VecDeque::new(),
            topics,
            qos: QoS::AtLeastOnce,
            offline_grace: DEFAULT_OFFLINE_GRACE,
            ip_address: None,
            state_tx,
            disconnected_since: Some(Instant::now()),
            metrics,
        }
    }

    /// QoS for readings and subscriptions
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Time allowed for the offline status to flush before the transport closes
    pub fn with_offline_grace(mut self, grace: Duration) -> Self {
        self.offline_grace = grace;
        self
    }

    /// Report this address instead of looking it up on every status publish
    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// How long the broker has been unreachable, `None` while connected
    pub fn disconnected_for(&self) -> Option<Duration> {
        self.disconnected_since.map(|since| since.elapsed())
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous.as_str(), to = %state.as_str(), "session_state_changed");
        }
    }

    /// Start the transport and wait up to `timeout` for the broker
    ///
    /// `false` means "not yet connected": the transport keeps trying and a
    /// later `Connected` event completes the session.
    pub async fn connect(&mut self, timeout: Duration) -> bool {
        if self.is_connected() {
            return true;
        }

        self.set_state(SessionState::Connecting);
        info!(topic_base = %self.topics.status.trim_end_matches("/status"), "broker_connecting");

        if let Err(e) = self.transport.start().await {
            warn!(error = %error_chain(&e), "transport_start_failed");
            self.set_state(SessionState::Disconnected);
            return false;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    warn!("transport_event_channel_closed");
                    self.set_state(SessionState::Disconnected);
                    return false;
                }
                Err(_) => {
                    warn!(timeout_secs = %timeout.as_secs_f64(), "broker_connect_timeout");
                    return false;
                }
            };

            match event {
                TransportEvent::Connected => {
                    self.on_connected().await;
                    return true;
                }
                TransportEvent::Disconnected { reason } => {
                    debug!(reason = %reason, "broker_disconnected_while_connecting");
                }
                message @ TransportEvent::MessageReceived { .. } => {
                    self.deferred.push_back(message);
                }
            }
        }
    }

    /// Next transport event. Cancel-safe; `None` once the transport is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.deferred.pop_front() {
            return Some(event);
        }
        self.events.recv().await
    }

    /// Apply a transport event to the session, returning any message to act on
    pub async fn handle_event(&mut self, event: TransportEvent) -> Option<Inbound> {
        match event {
            TransportEvent::Connected => {
                self.on_connected().await;
                None
            }
            TransportEvent::Disconnected { reason } => {
                self.on_disconnected(&reason);
                None
            }
            TransportEvent::MessageReceived { topic, payload } => self.classify(&topic, &payload),
        }
    }

    async fn on_connected(&mut self) {
        let outage = self.disconnected_since.take().map(|since| since.elapsed());
        self.set_state(SessionState::Connected);
        self.metrics.record_broker_connected();
        info!(outage_secs = ?outage.map(|d| d.as_secs()), "broker_connected");

        for topic in [&self.topics.command, &self.topics.config] {
            match self.transport.subscribe(topic, self.qos).await {
                Ok(()) => debug!(topic = %topic, "subscribed"),
                Err(e) => warn!(topic = %topic, error = %error_chain(&e), "subscribe_failed"),
            }
        }

        self.publish_status(true, self.ip_address.as_deref()).await;
    }

    fn on_disconnected(&mut self, reason: &str) {
        if self.is_connected() {
            self.metrics.record_broker_disconnected();
            self.disconnected_since = Some(Instant::now());
            warn!(reason = %reason, "broker_disconnected");
        }
        self.set_state(SessionState::Disconnected);
    }

    fn classify(&self, topic: &str, payload: &[u8]) -> Option<Inbound> {
        let parsed = if topic == self.topics.command {
            parse_command(payload).map(Inbound::Command)
        } else if topic == self.topics.config {
            parse_config_update(payload).map(Inbound::ConfigUpdate)
        } else {
            debug!(topic = %topic, "message_on_unhandled_topic");
            return None;
        };

        match parsed {
            Ok(inbound) => Some(inbound),
            Err(e) => {
                self.metrics.record_malformed_message();
                warn!(topic = %topic, error = %e, "malformed_message_discarded");
                None
            }
        }
    }

    async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        body: &T,
    ) -> Result<(), GatewayError> {
        let payload = serde_json::to_vec(body).map_err(TransportError::from)?;
        self.transport.publish(topic, qos, retain, payload).await?;
        Ok(())
    }

    /// Publish a snapshot. Returns `false` without touching the network unless connected.
    pub async fn publish_reading(&self, reading: &SensorReading) -> bool {
        if !self.is_connected() {
            debug!("reading_not_published_disconnected");
            return false;
        }

        match self.publish_json(&self.topics.sensors, self.qos, false, reading).await {
            Ok(()) => {
                debug!(values = %reading.len(), "reading_published");
                true
            }
            Err(e) => {
                warn!(error = %error_chain(&e), "reading_publish_failed");
                false
            }
        }
    }

    /// Publish online/offline status; attempted whenever the transport is started
    pub async fn publish_status(&self, online: bool, ip_address: Option<&str>) -> bool {
        if !self.transport.is_started() {
            debug!(online = online, "status_not_published_transport_stopped");
            return false;
        }

        let status = StatusPayload::new(online, ip_address);
        match self.publish_json(&self.topics.status, QoS::AtLeastOnce, true, &status).await {
            Ok(()) => {
                info!(online = online, "status_published");
                true
            }
            Err(e) => {
                warn!(online = online, error = %error_chain(&e), "status_publish_failed");
                false
            }
        }
    }

    /// Announce offline, let it flush, then close the transport
    pub async fn disconnect(&mut self) {
        if self.transport.is_started() {
            if self.publish_status(false, self.ip_address.as_deref()).await {
                tokio::time::sleep(self.offline_grace).await;
            }
            if let Err(e) = self.transport.close().await {
                warn!(error = %error_chain(&e), "transport_close_failed");
            }
        }

        if self.is_connected() {
            self.disconnected_since = Some(Instant::now());
        }
        self.set_state(SessionState::Disconnected);
        info!("broker_session_closed");
    }
}
