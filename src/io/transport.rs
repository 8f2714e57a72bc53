//! Broker transport boundary
//!
//! A transport runs its network loop on its own task and reports what happens
//! as typed [`TransportEvent`]s on a single-consumer channel. Requests
//! (subscribe, publish, close) go the other way through the trait.

use crate::domain::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;

/// Something the transport observed on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection (initial or after a reconnect)
    Connected,
    /// Connection lost or closed
    Disconnected { reason: String },
    /// Publish received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the network loop. Calling it again is a no-op.
    async fn start(&self) -> Result<(), TransportError>;

    /// Whether [`Transport::start`] has been called
    fn is_started(&self) -> bool;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Disconnect from the broker and stop the network loop
    async fn close(&self) -> Result<(), TransportError>;
}

/// Map a numeric QoS level from configuration
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_level(7), QoS::AtLeastOnce);
    }
}
