//! Shared types for the farm gateway

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Quantity measured by a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    SoilMoisture,
    Light,
    Co2,
    Ph,
    Ec,
    Pressure,
    Flow,
}

impl SensorKind {
    pub const ALL: [SensorKind; 9] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::SoilMoisture,
        SensorKind::Light,
        SensorKind::Co2,
        SensorKind::Ph,
        SensorKind::Ec,
        SensorKind::Pressure,
        SensorKind::Flow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "TEMPERATURE",
            SensorKind::Humidity => "HUMIDITY",
            SensorKind::SoilMoisture => "SOIL_MOISTURE",
            SensorKind::Light => "LIGHT",
            SensorKind::Co2 => "CO2",
            SensorKind::Ph => "PH",
            SensorKind::Ec => "EC",
            SensorKind::Pressure => "PRESSURE",
            SensorKind::Flow => "FLOW",
        }
    }

    /// Key used in published snapshots (lower-cased canonical name)
    pub fn key(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::SoilMoisture => "soil_moisture",
            SensorKind::Light => "light",
            SensorKind::Co2 => "co2",
            SensorKind::Ph => "ph",
            SensorKind::Ec => "ec",
            SensorKind::Pressure => "pressure",
            SensorKind::Flow => "flow",
        }
    }

    /// Inclusive (min, max) range produced by the simulated backend
    pub fn simulation_range(&self) -> (f64, f64) {
        match self {
            SensorKind::Temperature => (20.0, 35.0),
            SensorKind::Humidity => (45.0, 80.0),
            SensorKind::SoilMoisture => (30.0, 80.0),
            SensorKind::Light => (20_000.0, 50_000.0),
            SensorKind::Co2 => (350.0, 600.0),
            SensorKind::Ph => (5.5, 7.5),
            SensorKind::Ec => (0.8, 2.5),
            SensorKind::Pressure => (990.0, 1030.0),
            SensorKind::Flow => (0.0, 20.0),
        }
    }

    /// Decimal places kept in published values
    pub fn precision(&self) -> i32 {
        match self {
            SensorKind::Light | SensorKind::Co2 | SensorKind::Pressure => 0,
            _ => 1,
        }
    }

    /// Round a value to this kind's precision
    pub fn round(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.precision());
        (value * factor).round() / factor
    }
}

/// Kind of switched output driven by a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorKind {
    Relay,
    Fan,
    ExhaustFan,
    Fogger,
    IrrigationValve,
    ShadeNet,
    GrowLight,
    Heater,
    Cooler,
    DosingPump,
    WaterPump,
}

impl ActuatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorKind::Relay => "RELAY",
            ActuatorKind::Fan => "FAN",
            ActuatorKind::ExhaustFan => "EXHAUST_FAN",
            ActuatorKind::Fogger => "FOGGER",
            ActuatorKind::IrrigationValve => "IRRIGATION_VALVE",
            ActuatorKind::ShadeNet => "SHADE_NET",
            ActuatorKind::GrowLight => "GROW_LIGHT",
            ActuatorKind::Heater => "HEATER",
            ActuatorKind::Cooler => "COOLER",
            ActuatorKind::DosingPump => "DOSING_PUMP",
            ActuatorKind::WaterPump => "WATER_PUMP",
        }
    }
}

/// Device type as written in configuration (`type = "SOIL_MOISTURE"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Sensor(SensorKind),
    Actuator(ActuatorKind),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device type: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for DeviceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_uppercase().as_str() {
            "TEMPERATURE" => DeviceKind::Sensor(SensorKind::Temperature),
            "HUMIDITY" => DeviceKind::Sensor(SensorKind::Humidity),
            "SOIL_MOISTURE" => DeviceKind::Sensor(SensorKind::SoilMoisture),
            "LIGHT" => DeviceKind::Sensor(SensorKind::Light),
            "CO2" => DeviceKind::Sensor(SensorKind::Co2),
            "PH" => DeviceKind::Sensor(SensorKind::Ph),
            "EC" => DeviceKind::Sensor(SensorKind::Ec),
            "PRESSURE" => DeviceKind::Sensor(SensorKind::Pressure),
            "FLOW" => DeviceKind::Sensor(SensorKind::Flow),
            "RELAY" => DeviceKind::Actuator(ActuatorKind::Relay),
            "FAN" => DeviceKind::Actuator(ActuatorKind::Fan),
            "EXHAUST_FAN" => DeviceKind::Actuator(ActuatorKind::ExhaustFan),
            "FOGGER" => DeviceKind::Actuator(ActuatorKind::Fogger),
            "IRRIGATION_VALVE" => DeviceKind::Actuator(ActuatorKind::IrrigationValve),
            "SHADE_NET" => DeviceKind::Actuator(ActuatorKind::ShadeNet),
            "GROW_LIGHT" => DeviceKind::Actuator(ActuatorKind::GrowLight),
            "HEATER" => DeviceKind::Actuator(ActuatorKind::Heater),
            "COOLER" => DeviceKind::Actuator(ActuatorKind::Cooler),
            "DOSING_PUMP" => DeviceKind::Actuator(ActuatorKind::DosingPump),
            "WATER_PUMP" => DeviceKind::Actuator(ActuatorKind::WaterPump),
            _ => return Err(UnknownKind(s.to_string())),
        };
        Ok(kind)
    }
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Sensor(kind) => kind.as_str(),
            DeviceKind::Actuator(kind) => kind.as_str(),
        }
    }

    #[inline]
    pub fn is_sensor(&self) -> bool {
        matches!(self, DeviceKind::Sensor(_))
    }

    #[inline]
    pub fn is_actuator(&self) -> bool {
        matches!(self, DeviceKind::Actuator(_))
    }

    pub fn sensor_kind(&self) -> Option<SensorKind> {
        match self {
            DeviceKind::Sensor(kind) => Some(*kind),
            DeviceKind::Actuator(_) => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque hardware address (GPIO pin, ADC channel, sysfs path)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Channel(pub String);

impl Channel {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form of the address, if it is one
    pub fn as_number(&self) -> Option<u32> {
        self.0.trim().parse().ok()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(value: &str) -> Self {
        Channel(value.to_string())
    }
}

impl From<u32> for Channel {
    fn from(value: u32) -> Self {
        Channel(value.to_string())
    }
}

/// Linear correction applied to raw sensor values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub scale: f64,
    pub offset: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self { scale: 1.0, offset: 0.0 }
    }
}

impl Calibration {
    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.scale + self.offset
    }
}

/// A configured sensor or actuator. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,
    pub channel: Channel,
    pub unit: Option<String>,
    /// Identifier used by the cloud side in remote commands
    pub external_id: Option<String>,
    pub enabled: bool,
    pub calibration: Calibration,
}

impl Device {
    pub fn new(name: impl Into<String>, kind: DeviceKind, channel: impl Into<Channel>) -> Self {
        Self {
            name: name.into(),
            kind,
            channel: channel.into(),
            unit: None,
            external_id: None,
            enabled: true,
            calibration: Calibration::default(),
        }
    }

    pub fn sensor(name: impl Into<String>, kind: SensorKind, channel: impl Into<Channel>) -> Self {
        Self::new(name, DeviceKind::Sensor(kind), channel)
    }

    pub fn actuator(
        name: impl Into<String>,
        kind: ActuatorKind,
        channel: impl Into<Channel>,
    ) -> Self {
        Self::new(name, DeviceKind::Actuator(kind), channel)
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Output state of an actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActuatorState {
    On,
    Off,
    /// Returned for names that are not known actuators
    Unknown,
}

impl ActuatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuatorState::On => "ON",
            ActuatorState::Off => "OFF",
            ActuatorState::Unknown => "UNKNOWN",
        }
    }

    #[inline]
    pub fn is_on(&self) -> bool {
        *self == ActuatorState::On
    }

    /// Normalize a remote command value. Case and surrounding whitespace are ignored.
    pub fn from_command(command: &str, policy: UnknownCommandPolicy) -> Option<ActuatorState> {
        match command.trim().to_ascii_uppercase().as_str() {
            "ON" => Some(ActuatorState::On),
            "OFF" => Some(ActuatorState::Off),
            _ => match policy {
                UnknownCommandPolicy::Reject => None,
                UnknownCommandPolicy::Off => Some(ActuatorState::Off),
            },
        }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Treatment of command values other than ON / OFF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCommandPolicy {
    #[default]
    Reject,
    Off,
}

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }
}

/// Serialize a timestamp as ISO-8601 UTC with millisecond precision
pub fn serialize_timestamp<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Readings captured during one sampling tick
///
/// Serializes flat: `{"temperature": 24.1, "humidity": 61.0, "timestamp": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(flatten)]
    values: BTreeMap<String, f64>,
    #[serde(serialize_with = "serialize_timestamp")]
    timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self { values: BTreeMap::new(), timestamp }
    }

    /// Insert a value, returning the one it replaced
    pub fn insert(&mut self, key: impl Into<String>, value: f64) -> Option<f64> {
        self.values.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
