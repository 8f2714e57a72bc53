//! Sensor sampling - one snapshot per tick
//!
//! Each sensor is read independently; a failed or hung sensor is logged,
//! counted and left out of the snapshot.

use crate::domain::registry::DeviceRegistry;
use crate::domain::types::SensorReading;
use crate::infra::metrics::Metrics;
use crate::io::hardware::{bounded, Hardware};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct SensorSampler {
    registry: Arc<DeviceRegistry>,
    hardware: Arc<dyn Hardware>,
    metrics: Arc<Metrics>,
    io_timeout: Duration,
}

impl SensorSampler {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        hardware: Arc<dyn Hardware>,
        metrics: Arc<Metrics>,
        io_timeout: Duration,
    ) -> Self {
        Self { registry, hardware, metrics, io_timeout }
    }

    /// Read every enabled sensor into a snapshot stamped with the sampling time
    pub async fn sample_all(&self) -> SensorReading {
        let mut reading = SensorReading::new(Utc::now());

        for device in self.registry.sensors().filter(|d| d.enabled) {
            let Some(kind) = device.kind.sensor_kind() else {
                continue;
            };

            match bounded(self.io_timeout, self.hardware.read(kind, &device.channel)).await {
                Ok(raw) => {
                    let value = kind.round(device.calibration.apply(raw));
                    if let Some(previous) = reading.insert(kind.key(), value) {
                        warn!(
                            sensor = %device.name,
                            kind = %kind.as_str(),
                            replaced = %previous,
                            "sensor_kind_collision"
                        );
                    }
                    debug!(
                        sensor = %device.name,
                        value = %value,
                        unit = device.unit.as_deref().unwrap_or_default(),
                        "sensor_read"
                    );
                }
                Err(e) => {
                    self.metrics.record_sensor_read_failed();
                    warn!(
                        sensor = %device.name,
                        channel = %device.channel,
                        error = %e,
                        "sensor_read_failed"
                    );
                }
            }
        }

        reading
    }
}
