//! Error types shared across the gateway
//!
//! `GatewayError` is what callers of the controller, registry and session see.
//! Hardware and transport failures keep their own typed sources.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device identifier already registered: {0}")]
    DuplicateName(String),

    #[error("device is disabled: {0}")]
    Disabled(String),

    #[error("hardware I/O failed for {device}")]
    HardwareIo {
        device: String,
        #[source]
        source: HardwareError,
    },

    #[error("broker transport error")]
    Transport(#[from] TransportError),

    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

/// Failure reported by a hardware capability
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("I/O error on channel {channel}")]
    Io {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unparseable value {value:?} on channel {channel}")]
    Parse { channel: String, value: String },

    #[error("hardware call timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel {0} is not a valid address for this backend")]
    InvalidChannel(String),
}

/// Failure reported by the broker transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("mqtt client request failed")]
    Client(#[from] rumqttc::ClientError),

    #[error("transport has not been started")]
    NotStarted,

    #[error("payload serialization failed")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Render an error with its sources, `a: b: c`
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_chain_includes_sources() {
        let err = GatewayError::HardwareIo {
            device: "fan1".to_string(),
            source: HardwareError::Timeout(Duration::from_secs(2)),
        };
        assert_eq!(
            error_chain(&err),
            "hardware I/O failed for fan1: hardware call timed out after 2s"
        );
    }
}
