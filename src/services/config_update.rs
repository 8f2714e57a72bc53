//! Remote configuration updates received on the config topic

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

/// Receiver for JSON objects published to `{prefix}/{device}/config`
#[async_trait]
pub trait ConfigUpdateHandler: Send + Sync {
    async fn on_config_update(&self, update: Map<String, Value>);
}

/// Records the update in the log and applies nothing
#[derive(Debug, Default)]
pub struct LoggingConfigHandler;

#[async_trait]
impl ConfigUpdateHandler for LoggingConfigHandler {
    async fn on_config_update(&self, update: Map<String, Value>) {
        let keys: Vec<&str> = update.keys().map(String::as_str).collect();
        info!(keys = ?keys, "config_update_received");
    }
}
