//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `actuator` - Actuator state and command application
//! - `sampler` - Sensor snapshots
//! - `session` - Broker session state machine and message classification
//! - `config_update` - Handler for remote configuration messages
//! - `gateway` - The orchestrating loop

pub mod actuator;
pub mod config_update;
pub mod gateway;
pub mod sampler;
pub mod session;

// Re-export commonly used types
pub use actuator::{ActuatorController, FanOutReport};
pub use config_update::{ConfigUpdateHandler, LoggingConfigHandler};
pub use gateway::{GatewayLoop, LoopSettings};
pub use sampler::SensorSampler;
pub use session::{BrokerSession, Topics};
