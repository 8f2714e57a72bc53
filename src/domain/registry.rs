//! In-memory set of configured devices
//!
//! Names and external ids share one namespace: a remote command may use
//! either, so neither may shadow another device's identifier.

use crate::domain::error::GatewayError;
use crate::domain::types::Device;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    /// Devices in registration order
    devices: Vec<Device>,
    by_name: FxHashMap<String, usize>,
    by_external_id: FxHashMap<String, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list, failing on the first conflict
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Result<Self, GatewayError> {
        let mut registry = Self::new();
        for device in devices {
            registry.register(device)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, device: Device) -> Result<(), GatewayError> {
        if self.is_taken(&device.name) {
            return Err(GatewayError::DuplicateName(device.name));
        }
        if let Some(ref id) = device.external_id {
            if *id != device.name && self.is_taken(id) {
                return Err(GatewayError::DuplicateName(id.clone()));
            }
        }

        let index = self.devices.len();
        self.by_name.insert(device.name.clone(), index);
        if let Some(ref id) = device.external_id {
            self.by_external_id.insert(id.clone(), index);
        }
        self.devices.push(device);
        Ok(())
    }

    fn is_taken(&self, identifier: &str) -> bool {
        self.by_name.contains_key(identifier) || self.by_external_id.contains_key(identifier)
    }

    /// Resolve a device by exact name first, then by external id
    pub fn lookup(&self, identifier: &str) -> Result<&Device, GatewayError> {
        self.by_name
            .get(identifier)
            .or_else(|| self.by_external_id.get(identifier))
            .map(|&index| &self.devices[index])
            .ok_or_else(|| GatewayError::NotFound(identifier.to_string()))
    }

    /// All devices, in registration order
    pub fn all(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices.iter()
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices.iter().filter(|d| d.kind.is_sensor())
    }

    pub fn actuators(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices.iter().filter(|d| d.kind.is_actuator())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
