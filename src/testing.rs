//! Test doubles for the transport and hardware boundaries

use crate::domain::error::{HardwareError, TransportError};
use crate::domain::types::{Channel, SensorKind};
use crate::io::hardware::Hardware;
use crate::io::transport::{Transport, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::QoS;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One request made against [`FakeTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    Start,
    Subscribe(String),
    Publish { topic: String, retain: bool, payload: serde_json::Value },
    Close,
}

/// Transport that records every request and lets the test inject events
pub struct FakeTransport {
    ops: Mutex<Vec<TransportOp>>,
    started: AtomicBool,
    connect_on_start: bool,
    fail_publish: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl FakeTransport {
    /// Transport that reports `Connected` as soon as it is started
    pub fn new() -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        Self::build(true)
    }

    /// Transport that never connects unless the test injects `Connected`
    pub fn unreachable() -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        Self::build(false)
    }

    fn build(connect_on_start: bool) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let transport = Arc::new(Self {
            ops: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            connect_on_start,
            fail_publish: AtomicBool::new(false),
            events_tx,
        });
        (transport, events_rx)
    }

    /// Handle for injecting events from the test
    pub fn injector(&self) -> mpsc::Sender<TransportEvent> {
        self.events_tx.clone()
    }

    pub async fn inject(&self, event: TransportEvent) {
        self.events_tx.send(event).await.unwrap();
    }

    pub async fn inject_message(&self, topic: &str, payload: &str) {
        self.inject(TransportEvent::MessageReceived {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        })
        .await;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops.lock().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().clear();
    }

    /// Payloads published to a topic, in order
    pub fn published_to(&self, topic: &str) -> Vec<serde_json::Value> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                TransportOp::Publish { topic: t, payload, .. } if t == topic => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.ops.lock().push(TransportOp::Start);
        let first = !self.started.swap(true, Ordering::SeqCst);
        if first && self.connect_on_start {
            let _ = self.events_tx.send(TransportEvent::Connected).await;
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotStarted);
        }
        self.ops.lock().push(TransportOp::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        _qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotStarted);
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Other("publish rejected".to_string()));
        }
        let payload = serde_json::from_slice(&payload).unwrap_or(serde_json::Value::Null);
        self.ops.lock().push(TransportOp::Publish { topic: topic.to_string(), retain, payload });
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.ops.lock().push(TransportOp::Close);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Hardware with scripted readings, per-channel failures and a write log
#[derive(Default)]
pub struct FakeHardware {
    readings: Mutex<FxHashMap<Channel, f64>>,
    failing: Mutex<FxHashSet<Channel>>,
    hanging: Mutex<FxHashSet<Channel>>,
    writes: Mutex<Vec<(Channel, bool)>>,
}

impl FakeHardware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reading(&self, channel: impl Into<Channel>, value: f64) {
        self.readings.lock().insert(channel.into(), value);
    }

    /// Reads and writes on this channel fail with an I/O error
    pub fn fail(&self, channel: impl Into<Channel>) {
        self.failing.lock().insert(channel.into());
    }

    /// Reads and writes on this channel never complete
    pub fn hang(&self, channel: impl Into<Channel>) {
        self.hanging.lock().insert(channel.into());
    }

    pub fn writes(&self) -> Vec<(Channel, bool)> {
        self.writes.lock().clone()
    }

    fn check(&self, channel: &Channel) -> Result<bool, HardwareError> {
        if self.failing.lock().contains(channel) {
            return Err(HardwareError::Io {
                channel: channel.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "bus error"),
            });
        }
        Ok(self.hanging.lock().contains(channel))
    }
}

#[async_trait]
impl Hardware for FakeHardware {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn read(&self, _kind: SensorKind, channel: &Channel) -> Result<f64, HardwareError> {
        if self.check(channel)? {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.readings
            .lock()
            .get(channel)
            .copied()
            .ok_or_else(|| HardwareError::Io {
                channel: channel.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no reading scripted"),
            })
    }

    async fn write(&self, channel: &Channel, on: bool) -> Result<(), HardwareError> {
        if self.check(channel)? {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.writes.lock().push((channel.clone(), on));
        Ok(())
    }
}
