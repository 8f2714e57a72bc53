//! MQTT transport backed by rumqttc
//!
//! The rumqttc event loop runs on its own task. Reconnection is rumqttc's:
//! after a connection error the next `poll()` dials again, so the loop only
//! backs off and keeps polling.

use crate::domain::error::TransportError;
use crate::infra::config::Config;
use crate::io::transport::{Transport, TransportEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 100;

/// Upper bound on waiting for the event loop to flush a DISCONNECT
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Client id unique per process start, so a restarted gateway never fights
/// its previous session
pub fn client_id(device_id: &str) -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    format!("gateway_{}_{}", device_id, secs)
}

/// Build connection options from configuration
pub fn options_from_config(config: &Config, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    options.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs()));
    options.set_clean_session(true);

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        options.set_credentials(username, password);
    }

    options
}

pub struct MqttTransport {
    client: AsyncClient,
    /// Taken by `start()`
    eventloop: Mutex<Option<EventLoop>>,
    events_tx: mpsc::Sender<TransportEvent>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    reconnect_delay: Duration,
}

impl MqttTransport {
    /// Create the transport and the receiving end of its event channel
    pub fn new(
        options: MqttOptions,
        reconnect_delay: Duration,
        event_capacity: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(event_capacity);
        let (stop_tx, _) = watch::channel(false);

        let transport = Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            events_tx,
            stop_tx,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
            reconnect_delay,
        };
        (transport, events_rx)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let Some(eventloop) = self.eventloop.lock().take() else {
            return Ok(());
        };

        let task = tokio::spawn(run_event_loop(
            eventloop,
            self.events_tx.clone(),
            self.stop_tx.subscribe(),
            self.reconnect_delay,
        ));
        *self.task.lock() = Some(task);
        self.started.store(true, Ordering::Release);
        info!("mqtt_transport_started");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotStarted);
        }
        self.client.subscribe(topic, qos).await?;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotStarted);
        }
        self.client.publish(topic, qos, retain, payload).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let Some(mut task) = self.task.lock().take() else {
            return Ok(());
        };

        // The event loop exits on its own once the DISCONNECT is written.
        let requested = self.client.disconnect().await;
        if let Err(ref e) = requested {
            debug!(error = %e, "mqtt_disconnect_request_failed");
        }

        let joined = match tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                let _ = self.stop_tx.send(true);
                task.await
            }
        };

        info!("mqtt_transport_closed");
        if let Err(e) = joined {
            return Err(TransportError::Other(format!("event loop task failed: {}", e)));
        }
        requested.map_err(TransportError::from)
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    tx: mpsc::Sender<TransportEvent>,
    mut stop: watch::Receiver<bool>,
    reconnect_delay: Duration,
) {
    let mut connected = false;

    loop {
        let event = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!("mqtt_event_loop_stopped");
                    return;
                }
                continue;
            }
            result = eventloop.poll() => result,
        };

        let forward = match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected = true;
                    Some(TransportEvent::Connected)
                } else {
                    warn!(code = ?ack.code, "mqtt_connection_refused");
                    None
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Some(TransportEvent::MessageReceived {
                topic: publish.topic,
                payload: publish.payload,
            }),
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected = false;
                Some(TransportEvent::Disconnected { reason: "broker sent DISCONNECT".to_string() })
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                if connected {
                    let _ = tx
                        .send(TransportEvent::Disconnected { reason: "client disconnect".to_string() })
                        .await;
                }
                info!("mqtt_disconnect_sent");
                return;
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "mqtt_connection_error");
                let lost = std::mem::replace(&mut connected, false);
                if lost
                    && tx.send(TransportEvent::Disconnected { reason: e.to_string() }).await.is_err()
                {
                    return;
                }
                tokio::time::sleep(reconnect_delay).await;
                None
            }
        };

        if let Some(event) = forward {
            if tx.send(event).await.is_err() {
                debug!("mqtt_event_receiver_dropped");
                return;
            }
        }
    }
}
