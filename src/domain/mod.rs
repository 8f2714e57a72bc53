//! Domain models - devices, states, readings and errors
//!
//! - `types` - devices, sensor/actuator kinds, actuator and session state, readings
//! - `registry` - the fixed set of configured devices
//! - `error` - error taxonomy shared by all components

pub mod error;
pub mod registry;
pub mod types;

pub use error::{GatewayError, HardwareError, TransportError};
pub use registry::DeviceRegistry;
pub use types::{
    ActuatorKind, ActuatorState, Channel, Device, DeviceKind, SensorKind, SensorReading,
    SessionState, UnknownCommandPolicy,
};
