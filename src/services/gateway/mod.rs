//! Gateway loop - the single cooperative orchestrator
//!
//! One task drives everything:
//! - a tick that samples sensors once the reading interval has elapsed
//! - transport events (connect/disconnect, inbound commands and config)
//! - periodic metrics reporting
//! - the shutdown sequence: all actuators OFF, offline status, close
//!
//! Handlers run to completion outside `select!`, so a shutdown signal is only
//! observed between iterations and never interrupts a sample or a command.

mod handlers;
#[cfg(test)]
mod tests;

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::actuator::ActuatorController;
use crate::services::config_update::ConfigUpdateHandler;
use crate::services::sampler::SensorSampler;
use crate::services::session::BrokerSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Timing of the gateway loop
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub reading_interval: Duration,
    pub tick: Duration,
    pub metrics_interval: Duration,
    pub connect_timeout: Duration,
    /// Outage length after which the metrics report warns
    pub unreachable_warn: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reading_interval: Duration::from_secs(config.reading_interval_secs()),
            tick: Duration::from_millis(config.tick_ms()),
            metrics_interval: Duration::from_secs(config.metrics_interval_secs()),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs()),
            unreachable_warn: Duration::from_secs(config.unreachable_warn_secs()),
        }
    }
}

pub struct GatewayLoop {
    pub(crate) session: BrokerSession,
    pub(crate) controller: Arc<ActuatorController>,
    pub(crate) sampler: SensorSampler,
    pub(crate) config_handler: Arc<dyn ConfigUpdateHandler>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) settings: LoopSettings,
    /// When the last snapshot was taken; `None` samples on the next tick
    pub(crate) last_sample: Option<Instant>,
}

impl GatewayLoop {
    pub fn new(
        session: BrokerSession,
        controller: Arc<ActuatorController>,
        sampler: SensorSampler,
        config_handler: Arc<dyn ConfigUpdateHandler>,
        metrics: Arc<Metrics>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            session,
            controller,
            sampler,
            config_handler,
            metrics,
            settings,
            last_sample: None,
        }
    }

    /// Shared controller, for callers that need an emergency stop
    pub fn controller(&self) -> Arc<ActuatorController> {
        self.controller.clone()
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    /// Connect, then run until `shutdown` turns true (or its sender is dropped),
    /// then perform the shutdown sequence
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            reading_interval_secs = %self.settings.reading_interval.as_secs_f64(),
            tick_ms = %self.settings.tick.as_millis(),
            "gateway_loop_started"
        );

        if !self.session.connect(self.settings.connect_timeout).await {
            warn!("broker_not_connected_yet");
        }

        let mut tick = interval(self.settings.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut metrics_tick = interval_at(
            Instant::now() + self.settings.metrics_interval,
            self.settings.metrics_interval,
        );
        let mut events_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = self.session.next_event(), if events_open => match event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        warn!("transport_event_channel_closed");
                        events_open = false;
                    }
                },
                _ = tick.tick() => {
                    self.on_tick().await;
                }
                _ = metrics_tick.tick() => {
                    self.report_metrics();
                }
            }
        }

        self.shutdown().await;
    }

    /// Sample and publish if the reading interval has elapsed
    pub(crate) async fn on_tick(&mut self) {
        let due = self
            .last_sample
            .map_or(true, |last| last.elapsed() >= self.settings.reading_interval);
        if !due {
            return;
        }
        self.last_sample = Some(Instant::now());
        self.sample_and_publish().await;
    }

    async fn sample_and_publish(&self) -> bool {
        let reading = self.sampler.sample_all().await;
        if reading.is_empty() {
            debug!("no_readings_to_publish");
            return false;
        }

        if self.session.publish_reading(&reading).await {
            self.metrics.record_reading_published();
            true
        } else {
            self.metrics.record_reading_skipped();
            debug!(values = %reading.len(), "reading_skipped");
            false
        }
    }

    fn report_metrics(&self) {
        let summary = self.metrics.report(self.session.disconnected_for());
        summary.log();
        summary.warn_if_unreachable(self.settings.unreachable_warn);
    }

    /// Stop-side sequence: actuators OFF first, then the session
    async fn shutdown(&mut self) {
        info!("gateway_shutdown_started");

        let report = self.controller.all_off().await;
        report.log();

        self.session.disconnect().await;
        self.metrics.report(self.session.disconnected_for()).log();
        info!("gateway_shutdown_complete");
    }
}
