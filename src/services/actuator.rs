//! Actuator control - the only writer of actuator state
//!
//! Every state change goes through one async mutex that also covers the
//! hardware write, so a command racing `all_off` (or a second command for the
//! same relay) can never leave the recorded state out of step with the output.

use crate::domain::error::{error_chain, GatewayError};
use crate::domain::registry::DeviceRegistry;
use crate::domain::types::{ActuatorState, Device, UnknownCommandPolicy};
use crate::io::hardware::{bounded, Hardware};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of driving one actuator during a fan-out
#[derive(Debug)]
pub struct DeviceOutcome {
    pub name: String,
    pub result: Result<(), GatewayError>,
}

/// Per-device results of [`ActuatorController::all_off`]
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub outcomes: Vec<DeviceOutcome>,
}

impl FanOutReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeviceOutcome> + '_ {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn log(&self) {
        for failure in self.failures() {
            if let Err(ref e) = failure.result {
                warn!(actuator = %failure.name, error = %error_chain(e), "actuator_off_failed");
            }
        }
        info!(
            actuators = %self.len(),
            failed = %self.failures().count(),
            "all_off_complete"
        );
    }
}

pub struct ActuatorController {
    registry: Arc<DeviceRegistry>,
    hardware: Arc<dyn Hardware>,
    /// Current state keyed by device name; guarded together with hardware writes
    states: Mutex<FxHashMap<String, ActuatorState>>,
    policy: UnknownCommandPolicy,
    io_timeout: Duration,
}

impl ActuatorController {
    /// Every actuator starts OFF
    pub fn new(
        registry: Arc<DeviceRegistry>,
        hardware: Arc<dyn Hardware>,
        policy: UnknownCommandPolicy,
        io_timeout: Duration,
    ) -> Self {
        let states = registry
            .actuators()
            .map(|device| (device.name.clone(), ActuatorState::Off))
            .collect();

        Self { registry, hardware, states: Mutex::new(states), policy, io_timeout }
    }

    /// Resolve an identifier to an enabled actuator
    fn resolve(&self, identifier: &str) -> Result<&Device, GatewayError> {
        let device = self.registry.lookup(identifier)?;
        if !device.kind.is_actuator() {
            return Err(GatewayError::NotFound(identifier.to_string()));
        }
        if !device.enabled {
            return Err(GatewayError::Disabled(device.name.clone()));
        }
        Ok(device)
    }

    async fn drive(&self, device: &Device, target: ActuatorState) -> Result<(), GatewayError> {
        bounded(self.io_timeout, self.hardware.write(&device.channel, target.is_on()))
            .await
            .map_err(|source| GatewayError::HardwareIo { device: device.name.clone(), source })
    }

    /// Apply a remote command (`"on"`, `" OFF "`, ...) to an actuator by name or external id
    ///
    /// The state only changes once the hardware write succeeded. Applying the
    /// current state again re-asserts the output.
    pub async fn apply(&self, identifier: &str, command: &str) -> Result<ActuatorState, GatewayError> {
        let target = ActuatorState::from_command(command, self.policy).ok_or_else(|| {
            GatewayError::MalformedMessage(format!(
                "unrecognized command {:?} for {}",
                command, identifier
            ))
        })?;
        let device = self.resolve(identifier)?;

        let mut states = self.states.lock().await;
        self.drive(device, target).await?;
        let previous = states.insert(device.name.clone(), target);

        info!(
            actuator = %device.name,
            identifier = %identifier,
            state = %target,
            previous = ?previous,
            "actuator_set"
        );
        Ok(target)
    }

    /// Force every enabled actuator OFF, continuing past failures
    pub async fn all_off(&self) -> FanOutReport {
        let mut states = self.states.lock().await;
        let mut report = FanOutReport::default();

        for device in self.registry.actuators().filter(|d| d.enabled) {
            let result = self.drive(device, ActuatorState::Off).await;
            if result.is_ok() {
                states.insert(device.name.clone(), ActuatorState::Off);
                debug!(actuator = %device.name, "actuator_forced_off");
            }
            report.outcomes.push(DeviceOutcome { name: device.name.clone(), result });
        }

        report
    }

    /// Current state of an actuator; `Unknown` for anything that is not one
    pub async fn state_of(&self, identifier: &str) -> ActuatorState {
        let Ok(device) = self.registry.lookup(identifier) else {
            return ActuatorState::Unknown;
        };
        self.states.lock().await.get(&device.name).copied().unwrap_or(ActuatorState::Unknown)
    }

    /// States of all actuators in registration order
    pub async fn states(&self) -> Vec<(String, ActuatorState)> {
        let states = self.states.lock().await;
        self.registry
            .actuators()
            .map(|device| {
                let state = states.get(&device.name).copied().unwrap_or(ActuatorState::Unknown);
                (device.name.clone(), state)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::HardwareError;
    use crate::domain::types::{ActuatorKind, Channel, SensorKind};
    use crate::testing::FakeHardware;

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(
            DeviceRegistry::from_devices([
                Device::sensor("dht_temp", SensorKind::Temperature, 4u32),
                Device::actuator("fan1", ActuatorKind::Fan, 17u32).with_external_id("A100"),
                Device::actuator("pump1", ActuatorKind::WaterPump, 27u32),
                Device::actuator("heater", ActuatorKind::Heater, 22u32).disabled(),
            ])
            .unwrap(),
        )
    }

    fn controller(hardware: Arc<FakeHardware>) -> ActuatorController {
        ActuatorController::new(
            registry(),
            hardware,
            UnknownCommandPolicy::Reject,
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_initial_states_off() {
        let controller = controller(FakeHardware::new());
        assert_eq!(
            controller.states().await,
            vec![
                ("fan1".to_string(), ActuatorState::Off),
                ("pump1".to_string(), ActuatorState::Off),
                ("heater".to_string(), ActuatorState::Off),
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_case_insensitive() {
        let hardware = FakeHardware::new();
        let controller = controller(hardware.clone());

        assert_eq!(controller.apply("fan1", "on").await.unwrap(), ActuatorState::On);
        assert_eq!(controller.apply("fan1", " Off ").await.unwrap(), ActuatorState::Off);
        assert_eq!(controller.apply("fan1", "ON").await.unwrap(), ActuatorState::On);
        assert_eq!(controller.state_of("fan1").await, ActuatorState::On);
        assert_eq!(hardware.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_and_reasserts_output() {
        let hardware = FakeHardware::new();
        let controller = controller(hardware.clone());

        controller.apply("pump1", "ON").await.unwrap();
        controller.apply("pump1", "ON").await.unwrap();
        assert_eq!(controller.state_of("pump1").await, ActuatorState::On);
        assert_eq!(
            hardware.writes(),
            vec![(Channel::from(27u32), true), (Channel::from(27u32), true)]
        );
    }

    #[tokio::test]
    async fn test_apply_by_external_id() {
        let controller = controller(FakeHardware::new());
        controller.apply("A100", "ON").await.unwrap();
        assert_eq!(controller.state_of("fan1").await, ActuatorState::On);
        assert_eq!(controller.state_of("A100").await, ActuatorState::On);
    }

    #[tokio::test]
    async fn test_apply_unknown_command_rejected_without_write() {
        let hardware = FakeHardware::new();
        let controller = controller(hardware.clone());

        let err = controller.apply("fan1", "TOGGLE").await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedMessage(_)));
        assert!(hardware.writes().is_empty());
    }

    #[tokio::test]
    async fn test_apply_unknown_command_off_policy() {
        let hardware = FakeHardware::new();
        let controller = ActuatorController::new(
            registry(),
            hardware.clone(),
            UnknownCommandPolicy::Off,
            Duration::from_millis(50),
        );
        controller.apply("fan1", "ON").await.unwrap();
        assert_eq!(controller.apply("fan1", "TOGGLE").await.unwrap(), ActuatorState::Off);
    }

    #[tokio::test]
    async fn test_apply_unknown_or_sensor_or_disabled() {
        let controller = controller(FakeHardware::new());
        assert!(matches!(
            controller.apply("missing", "ON").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            controller.apply("dht_temp", "ON").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            controller.apply("heater", "ON").await,
            Err(GatewayError::Disabled(name)) if name == "heater"
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let hardware = FakeHardware::new();
        let controller = controller(hardware.clone());
        hardware.fail(17u32);

        let err = controller.apply("fan1", "ON").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::HardwareIo { ref device, source: HardwareError::Io { .. } } if device == "fan1"
        ));
        assert_eq!(controller.state_of("fan1").await, ActuatorState::Off);
    }

    #[tokio::test]
    async fn test_hung_write_times_out() {
        let hardware = FakeHardware::new();
        let controller = controller(hardware.clone());
        hardware.hang(17u32);

        let err = controller.apply("fan1", "ON").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::HardwareIo { source: HardwareError::Timeout(_), .. }
        ));
        assert_eq!(controller.state_of("fan1").await, ActuatorState::Off);
    }

    #[tokio::test]
    async fn test_state_of_unknown_name() {
        let controller = controller(FakeHardware::new());
        assert_eq!(controller.state_of("missing").await, ActuatorState::Unknown);
        assert_eq!(controller.state_of("dht_temp").await, ActuatorState::Unknown);
    }

    #[tokio::test]
    async fn test_all_off_forces_enabled_actuators_off() {
        let hardware = FakeHardware::new();
        let controller = controller(hardware.clone());
        controller.apply("fan1", "ON").await.unwrap();
        controller.apply("pump1", "ON").await.unwrap();

        let report = controller.all_off().await;
        assert!(report.all_succeeded());
        assert_eq!(report.len(), 2);
        for (_, state) in controller.states().await {
            assert_eq!(state, ActuatorState::Off);
        }
        // Disabled heater on pin 22 is never driven.
        assert!(hardware.writes().iter().all(|(channel, _)| channel != &Channel::from(22u32)));
    }

    #[tokio::test]
    async fn test_all_off_continues_past_failures() {
        let hardware = FakeHardware::new();
        let controller = controller(hardware.clone());
        controller.apply("fan1", "ON").await.unwrap();
        controller.apply("pump1", "ON").await.unwrap();
        hardware.fail(17u32);

        let report = controller.all_off().await;
        assert!(!report.all_succeeded());
        let failed: Vec<&str> = report.failures().map(|o| o.name.as_str()).collect();
        assert_eq!(failed, vec!["fan1"]);
        assert_eq!(controller.state_of("fan1").await, ActuatorState::On);
        assert_eq!(controller.state_of("pump1").await, ActuatorState::Off);
    }

    #[tokio::test]
    async fn test_concurrent_commands_serialize() {
        let hardware = FakeHardware::new();
        let controller = Arc::new(controller(hardware.clone()));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let controller = controller.clone();
            let command = if i % 2 == 0 { "ON" } else { "OFF" };
            tasks.push(tokio::spawn(async move { controller.apply("fan1", command).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let last_write = hardware.writes().last().map(|(_, on)| *on).unwrap();
        assert_eq!(controller.state_of("fan1").await.is_on(), last_write);
    }
}
