//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `hardware` - Sensor read / actuator write capability and backend selection
//! - `simulated` - Random-value backend for development
//! - `sysfs` - Linux sysfs GPIO / IIO backend
//! - `transport` - Broker transport trait and typed events
//! - `mqtt` - rumqttc transport

pub mod hardware;
pub mod mqtt;
pub mod simulated;
pub mod sysfs;
pub mod transport;

// Re-export commonly used types
pub use hardware::Hardware;
pub use mqtt::MqttTransport;
pub use simulated::SimulatedHardware;
pub use sysfs::SysfsHardware;
pub use transport::{Transport, TransportEvent};
