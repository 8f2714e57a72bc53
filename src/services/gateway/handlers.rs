//! Inbound event handlers for the gateway loop

use super::GatewayLoop;
use crate::domain::error::{error_chain, GatewayError};
use crate::io::transport::TransportEvent;
use crate::services::session::{ActuatorCommand, Inbound};
use tracing::{debug, warn};

impl GatewayLoop {
    /// Let the session process a transport event, then act on what it yields
    pub(crate) async fn on_event(&mut self, event: TransportEvent) {
        if let Some(inbound) = self.session.handle_event(event).await {
            self.dispatch(inbound).await;
        }
    }

    pub(crate) async fn dispatch(&self, inbound: Inbound) {
        match inbound {
            Inbound::Command(command) => self.handle_command(command).await,
            Inbound::ConfigUpdate(update) => self.config_handler.on_config_update(update).await,
        }
    }

    async fn handle_command(&self, command: ActuatorCommand) {
        match self.controller.apply(&command.actuator_id, &command.command).await {
            Ok(state) => {
                self.metrics.record_command_applied();
                debug!(actuator = %command.actuator_id, state = %state, "command_applied");
            }
            Err(e) => {
                self.metrics.record_command_failed();
                if matches!(e, GatewayError::MalformedMessage(_)) {
                    self.metrics.record_malformed_message();
                }
                warn!(
                    actuator = %command.actuator_id,
                    command = %command.command,
                    error = %error_chain(&e),
                    "command_rejected"
                );
            }
        }
    }
}
