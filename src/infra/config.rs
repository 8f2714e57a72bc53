//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::registry::DeviceRegistry;
use crate::domain::types::{Calibration, Channel, Device, DeviceKind, UnknownCommandPolicy};
use anyhow::{bail, Context};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareBackend {
    /// Sysfs on an ARM Linux board with GPIO, simulated elsewhere
    #[default]
    Auto,
    Simulated,
    Sysfs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    /// Identity used in topic names; defaults to the board's MAC address
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_reading_interval")]
    pub reading_interval_secs: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
    #[serde(default)]
    pub unknown_command: UnknownCommandPolicy,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            device_id: None,
            reading_interval_secs: default_reading_interval(),
            tick_ms: default_tick_ms(),
            metrics_interval_secs: default_metrics_interval(),
            unknown_command: UnknownCommandPolicy::default(),
        }
    }
}

fn default_reading_interval() -> u64 {
    30
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttSection {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_offline_grace")]
    pub offline_grace_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_unreachable_warn")]
    pub unreachable_warn_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            qos: default_qos(),
            topic_prefix: default_topic_prefix(),
            connect_timeout_secs: default_connect_timeout(),
            offline_grace_ms: default_offline_grace(),
            reconnect_delay_ms: default_reconnect_delay(),
            unreachable_warn_secs: default_unreachable_warn(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_qos() -> u8 {
    1
}

fn default_topic_prefix() -> String {
    "farm".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_offline_grace() -> u64 {
    500
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_unreachable_warn() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareSection {
    #[serde(default)]
    pub backend: HardwareBackend,
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
    #[serde(default = "default_iio_root")]
    pub iio_root: PathBuf,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
}

impl Default for HardwareSection {
    fn default() -> Self {
        Self {
            backend: HardwareBackend::default(),
            gpio_root: default_gpio_root(),
            iio_root: default_iio_root(),
            io_timeout_ms: default_io_timeout(),
        }
    }
}

fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

fn default_iio_root() -> PathBuf {
    PathBuf::from("/sys/bus/iio/devices/iio:device0")
}

fn default_io_timeout() -> u64 {
    2000
}

/// Hardware address as written in TOML: `pin = 17` or `channel = "/sys/..."`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawChannel {
    Number(u32),
    Text(String),
}

impl From<RawChannel> for Channel {
    fn from(raw: RawChannel) -> Self {
        match raw {
            RawChannel::Number(n) => Channel::from(n),
            RawChannel::Text(s) => Channel(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSection {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(alias = "pin")]
    pub channel: RawChannel,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// External identifier used by remote commands
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

impl DeviceSection {
    fn into_device(self) -> anyhow::Result<Device> {
        let kind: DeviceKind = self.kind.parse()?;
        let calibration = Calibration {
            scale: self.scale.unwrap_or(1.0),
            offset: self.offset.unwrap_or(0.0),
        };
        Ok(Device {
            name: self.name,
            kind,
            channel: self.channel.into(),
            unit: self.unit,
            external_id: self.id,
            enabled: self.enabled,
            calibration,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub hardware: HardwareSection,
    #[serde(default)]
    pub sensors: Vec<DeviceSection>,
    #[serde(default)]
    pub actuators: Vec<DeviceSection>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    device_id: Option<String>,
    reading_interval_secs: u64,
    tick_ms: u64,
    metrics_interval_secs: u64,
    unknown_command: UnknownCommandPolicy,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_keep_alive_secs: u64,
    mqtt_qos: u8,
    topic_prefix: String,
    connect_timeout_secs: u64,
    offline_grace_ms: u64,
    reconnect_delay_ms: u64,
    unreachable_warn_secs: u64,
    hardware_backend: HardwareBackend,
    gpio_root: PathBuf,
    iio_root: PathBuf,
    io_timeout_ms: u64,
    devices: Vec<Device>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let toml_config = TomlConfig::default();
        // No devices: pins are only driven when a file names them.
        let mut config = Self::from_sections(toml_config, Vec::new());
        config.config_file = "default".to_string();
        config
    }
}

impl Config {
    fn from_sections(toml_config: TomlConfig, devices: Vec<Device>) -> Self {
        let TomlConfig { gateway, mqtt, hardware, .. } = toml_config;
        Self {
            device_id: gateway.device_id.filter(|id| !id.trim().is_empty()),
            reading_interval_secs: gateway.reading_interval_secs,
            tick_ms: gateway.tick_ms,
            metrics_interval_secs: gateway.metrics_interval_secs,
            unknown_command: gateway.unknown_command,
            mqtt_host: mqtt.host,
            mqtt_port: mqtt.port,
            mqtt_username: mqtt.username,
            mqtt_password: mqtt.password,
            mqtt_keep_alive_secs: mqtt.keep_alive_secs,
            mqtt_qos: mqtt.qos,
            topic_prefix: mqtt.topic_prefix,
            connect_timeout_secs: mqtt.connect_timeout_secs,
            offline_grace_ms: mqtt.offline_grace_ms,
            reconnect_delay_ms: mqtt.reconnect_delay_ms,
            unreachable_warn_secs: mqtt.unreachable_warn_secs,
            hardware_backend: hardware.backend,
            gpio_root: hardware.gpio_root,
            iio_root: hardware.iio_root,
            io_timeout_ms: hardware.io_timeout_ms,
            devices,
            config_file: String::new(),
        }
    }

    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        DEFAULT_CONFIG_PATH.to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.config_file = path.display().to_string();
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut toml_config: TomlConfig = toml::from_str(content).context("Failed to parse TOML")?;

        let mut devices = Vec::with_capacity(toml_config.sensors.len() + toml_config.actuators.len());
        for section in std::mem::take(&mut toml_config.sensors) {
            let name = section.name.clone();
            let device = section.into_device().with_context(|| format!("sensor {}", name))?;
            if !device.kind.is_sensor() {
                bail!("sensor {} has actuator type {}", name, device.kind);
            }
            devices.push(device);
        }
        for section in std::mem::take(&mut toml_config.actuators) {
            let name = section.name.clone();
            let device = section.into_device().with_context(|| format!("actuator {}", name))?;
            if !device.kind.is_actuator() {
                bail!("actuator {} has sensor type {}", name, device.kind);
            }
            devices.push(device);
        }

        let config = Self::from_sections(toml_config, devices);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration - falls back to defaults only when the file does not exist
    ///
    /// Read, parse and validation errors are returned to the caller.
    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        match fs::metadata(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path, "config_file_missing_using_defaults");
                Ok(Self::default())
            }
            _ => Self::from_file(path),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.reading_interval_secs == 0 {
            bail!("gateway.reading_interval_secs must be greater than zero");
        }
        if self.tick_ms == 0 {
            bail!("gateway.tick_ms must be greater than zero");
        }
        if self.metrics_interval_secs == 0 {
            bail!("gateway.metrics_interval_secs must be greater than zero");
        }

        // Names and external ids share one namespace.
        self.registry()?;

        // Two enabled sensors of one kind would overwrite each other in a snapshot.
        let mut seen: FxHashMap<&'static str, &str> = FxHashMap::default();
        for device in self.devices.iter().filter(|d| d.enabled) {
            if let Some(kind) = device.kind.sensor_kind() {
                if let Some(other) = seen.insert(kind.key(), &device.name) {
                    bail!(
                        "sensors {} and {} are both {}; readings are keyed by type",
                        other,
                        device.name,
                        kind.as_str()
                    );
                }
            }
        }
        Ok(())
    }

    /// Build the device registry
    pub fn registry(&self) -> anyhow::Result<DeviceRegistry> {
        DeviceRegistry::from_devices(self.devices.iter().cloned()).context("Invalid device list")
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn reading_interval_secs(&self) -> u64 {
        self.reading_interval_secs
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn unknown_command(&self) -> UnknownCommandPolicy {
        self.unknown_command
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_keep_alive_secs(&self) -> u64 {
        self.mqtt_keep_alive_secs
    }

    pub fn mqtt_qos(&self) -> u8 {
        self.mqtt_qos
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs
    }

    pub fn offline_grace_ms(&self) -> u64 {
        self.offline_grace_ms
    }

    pub fn reconnect_delay_ms(&self) -> u64 {
        self.reconnect_delay_ms
    }

    pub fn unreachable_warn_secs(&self) -> u64 {
        self.unreachable_warn_secs
    }

    pub fn hardware_backend(&self) -> HardwareBackend {
        self.hardware_backend
    }

    pub fn gpio_root(&self) -> &Path {
        &self.gpio_root
    }

    pub fn iio_root(&self) -> &Path {
        &self.iio_root
    }

    pub fn io_timeout_ms(&self) -> u64 {
        self.io_timeout_ms
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Override the hardware backend (`--simulate`)
    pub fn with_hardware_backend(mut self, backend: HardwareBackend) -> Self {
        self.hardware_backend = backend;
        self
    }
}
