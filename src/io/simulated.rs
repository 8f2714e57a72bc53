//! Simulated hardware for development without a board attached

use crate::domain::error::HardwareError;
use crate::domain::types::{Channel, SensorKind};
use crate::io::hardware::Hardware;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Produces readings uniformly inside each kind's simulation range and
/// remembers every output written.
#[derive(Debug, Default)]
pub struct SimulatedHardware {
    outputs: Mutex<FxHashMap<Channel, bool>>,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level written to a channel
    pub fn output(&self, channel: &Channel) -> Option<bool> {
        self.outputs.lock().get(channel).copied()
    }
}

#[async_trait]
impl Hardware for SimulatedHardware {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn read(&self, kind: SensorKind, _channel: &Channel) -> Result<f64, HardwareError> {
        let (min, max) = kind.simulation_range();
        let value = rand::thread_rng().gen_range(min..=max);
        Ok(kind.round(value).clamp(min, max))
    }

    async fn write(&self, channel: &Channel, on: bool) -> Result<(), HardwareError> {
        self.outputs.lock().insert(channel.clone(), on);
        debug!(channel = %channel, on = on, "simulated_output_written");
        Ok(())
    }
}
