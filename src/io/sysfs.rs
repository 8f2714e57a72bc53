//! Linux sysfs hardware backend
//!
//! Relays: `{gpio_root}/gpio{N}/value`, exported and set to `out` on first use.
//! Sensors: a numeric channel reads `{iio_root}/in_voltage{N}_raw`; any other
//! channel is taken as a file path holding a single number (1-wire, hwmon).

use crate::domain::error::HardwareError;
use crate::domain::types::{Channel, SensorKind};
use crate::io::hardware::Hardware;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct SysfsHardware {
    gpio_root: PathBuf,
    iio_root: PathBuf,
    /// Pins already exported and configured as outputs
    prepared: Mutex<FxHashSet<u32>>,
}

impl SysfsHardware {
    pub fn new(gpio_root: impl Into<PathBuf>, iio_root: impl Into<PathBuf>) -> Self {
        Self {
            gpio_root: gpio_root.into(),
            iio_root: iio_root.into(),
            prepared: Mutex::new(FxHashSet::default()),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.gpio_root.join(format!("gpio{}", pin))
    }

    fn sensor_path(&self, channel: &Channel) -> PathBuf {
        match channel.as_number() {
            Some(n) => self.iio_root.join(format!("in_voltage{}_raw", n)),
            None => PathBuf::from(channel.as_str()),
        }
    }

    async fn prepare_output(&self, pin: u32) -> Result<(), HardwareError> {
        if self.prepared.lock().contains(&pin) {
            return Ok(());
        }

        let dir = self.pin_dir(pin);
        if tokio::fs::metadata(&dir).await.is_err() {
            write_file(&self.gpio_root.join("export"), &pin.to_string()).await?;
        }
        write_file(&dir.join("direction"), "out").await?;

        self.prepared.lock().insert(pin);
        info!(pin = pin, "gpio_output_prepared");
        Ok(())
    }
}

async fn write_file(path: &Path, contents: &str) -> Result<(), HardwareError> {
    tokio::fs::write(path, contents).await.map_err(|source| HardwareError::Io {
        channel: path.display().to_string(),
        source,
    })
}

#[async_trait]
impl Hardware for SysfsHardware {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    async fn read(&self, _kind: SensorKind, channel: &Channel) -> Result<f64, HardwareError> {
        let path = self.sensor_path(channel);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|source| HardwareError::Io {
            channel: channel.to_string(),
            source,
        })?;

        let trimmed = raw.trim();
        trimmed.parse::<f64>().map_err(|_| HardwareError::Parse {
            channel: channel.to_string(),
            value: trimmed.to_string(),
        })
    }

    async fn write(&self, channel: &Channel, on: bool) -> Result<(), HardwareError> {
        let pin = channel
            .as_number()
            .ok_or_else(|| HardwareError::InvalidChannel(channel.to_string()))?;

        self.prepare_output(pin).await?;
        write_file(&self.pin_dir(pin).join("value"), if on { "1" } else { "0" }).await?;
        debug!(pin = pin, on = on, "gpio_written");
        Ok(())
    }
}
