//! Hardware capability - the only way the core touches sensors and relays
//!
//! Backends:
//! - `SimulatedHardware` - random readings in per-kind ranges, in-memory outputs
//! - `SysfsHardware` - Linux sysfs GPIO for relays, IIO / plain files for sensors
//!
//! The backend is chosen once by [`create`]; components only see `Arc<dyn Hardware>`.

use crate::domain::error::HardwareError;
use crate::domain::types::{Channel, SensorKind};
use crate::infra::config::{Config, HardwareBackend};
use crate::io::simulated::SimulatedHardware;
use crate::io::sysfs::SysfsHardware;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait Hardware: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Read the raw value of a sensor
    async fn read(&self, kind: SensorKind, channel: &Channel) -> Result<f64, HardwareError>;

    /// Drive a switched output high (`on`) or low
    async fn write(&self, channel: &Channel, on: bool) -> Result<(), HardwareError>;
}

/// Bound a hardware call. A backend that hangs must not stall the gateway loop.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, HardwareError>
where
    F: Future<Output = Result<T, HardwareError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::Timeout(limit)),
    }
}

/// Construct the hardware backend selected by configuration
pub fn create(config: &Config) -> Arc<dyn Hardware> {
    let backend = match config.hardware_backend() {
        HardwareBackend::Auto => detect(config.gpio_root()),
        other => other,
    };

    let hardware: Arc<dyn Hardware> = match backend {
        HardwareBackend::Sysfs => {
            Arc::new(SysfsHardware::new(config.gpio_root(), config.iio_root()))
        }
        HardwareBackend::Simulated | HardwareBackend::Auto => Arc::new(SimulatedHardware::new()),
    };

    info!(
        backend = %hardware.name(),
        requested = ?config.hardware_backend(),
        "hardware_backend_selected"
    );
    hardware
}

/// Real GPIO only on an ARM Linux board that exposes the sysfs GPIO tree
fn detect(gpio_root: &Path) -> HardwareBackend {
    let arm = matches!(std::env::consts::ARCH, "arm" | "aarch64");
    if cfg!(target_os = "linux") && arm && gpio_root.exists() {
        HardwareBackend::Sysfs
    } else {
        HardwareBackend::Simulated
    }
}
