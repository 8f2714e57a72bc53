//! Lock-free gateway counters and periodic reporting
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Default)]
struct Counter(AtomicU64);

impl Counter {
    #[inline]
    fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// Gateway metrics collector
///
/// Totals are monotonic; `*_since_report` counters are swapped to zero by
/// [`Metrics::report`].
pub struct Metrics {
    readings_published: Counter,
    readings_skipped: Counter,
    readings_since_report: Counter,
    sensor_read_failures: Counter,
    commands_applied: Counter,
    commands_failed: Counter,
    commands_since_report: Counter,
    malformed_messages: Counter,
    broker_connects: Counter,
    broker_disconnects: Counter,
    last_report_time: Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            readings_published: Counter::default(),
            readings_skipped: Counter::default(),
            readings_since_report: Counter::default(),
            sensor_read_failures: Counter::default(),
            commands_applied: Counter::default(),
            commands_failed: Counter::default(),
            commands_since_report: Counter::default(),
            malformed_messages: Counter::default(),
            broker_connects: Counter::default(),
            broker_disconnects: Counter::default(),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    pub fn record_reading_published(&self) {
        self.readings_published.incr();
        self.readings_since_report.incr();
    }

    /// Snapshot dropped because the broker was unreachable
    pub fn record_reading_skipped(&self) {
        self.readings_skipped.incr();
    }

    pub fn record_sensor_read_failed(&self) {
        self.sensor_read_failures.incr();
    }

    pub fn record_command_applied(&self) {
        self.commands_applied.incr();
        self.commands_since_report.incr();
    }

    pub fn record_command_failed(&self) {
        self.commands_failed.incr();
        self.commands_since_report.incr();
    }

    pub fn record_malformed_message(&self) {
        self.malformed_messages.incr();
    }

    pub fn record_broker_connected(&self) {
        self.broker_connects.incr();
    }

    pub fn record_broker_disconnected(&self) {
        self.broker_disconnects.incr();
    }

    pub fn readings_published(&self) -> u64 {
        self.readings_published.get()
    }

    pub fn readings_skipped(&self) -> u64 {
        self.readings_skipped.get()
    }

    pub fn sensor_read_failures(&self) -> u64 {
        self.sensor_read_failures.get()
    }

    pub fn commands_applied(&self) -> u64 {
        self.commands_applied.get()
    }

    pub fn commands_failed(&self) -> u64 {
        self.commands_failed.get()
    }

    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.get()
    }

    /// Build a summary and reset the per-interval counters
    ///
    /// `broker_down_for` is how long the session has been disconnected, if it is.
    pub fn report(&self, broker_down_for: Option<Duration>) -> MetricsSummary {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last);
            *last = now;
            elapsed
        };

        MetricsSummary {
            interval_secs: elapsed.as_secs_f64(),
            readings_published: self.readings_published.get(),
            readings_skipped: self.readings_skipped.get(),
            readings_in_interval: self.readings_since_report.take(),
            sensor_read_failures: self.sensor_read_failures.get(),
            commands_applied: self.commands_applied.get(),
            commands_failed: self.commands_failed.get(),
            commands_in_interval: self.commands_since_report.take(),
            malformed_messages: self.malformed_messages.get(),
            broker_connects: self.broker_connects.get(),
            broker_disconnects: self.broker_disconnects.get(),
            broker_down_secs: broker_down_for.map(|d| d.as_secs()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub interval_secs: f64,
    pub readings_published: u64,
    pub readings_skipped: u64,
    pub readings_in_interval: u64,
    pub sensor_read_failures: u64,
    pub commands_applied: u64,
    pub commands_failed: u64,
    pub commands_in_interval: u64,
    pub malformed_messages: u64,
    pub broker_connects: u64,
    pub broker_disconnects: u64,
    /// Seconds the broker has been unreachable, `None` while connected
    pub broker_down_secs: Option<u64>,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            interval_secs = %format!("{:.1}", self.interval_secs),
            readings_published = %self.readings_published,
            readings_skipped = %self.readings_skipped,
            readings_in_interval = %self.readings_in_interval,
            sensor_read_failures = %self.sensor_read_failures,
            commands_applied = %self.commands_applied,
            commands_failed = %self.commands_failed,
            commands_in_interval = %self.commands_in_interval,
            malformed_messages = %self.malformed_messages,
            broker_connects = %self.broker_connects,
            broker_disconnects = %self.broker_disconnects,
            broker_down_secs = ?self.broker_down_secs,
            "metrics"
        );
    }

    /// Log a warning if the broker has been unreachable for at least `threshold`
    pub fn warn_if_unreachable(&self, threshold: Duration) -> bool {
        match self.broker_down_secs {
            Some(secs) if secs >= threshold.as_secs() => {
                warn!(down_secs = %secs, "broker_unreachable");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_resets_interval_counters_only() {
        let metrics = Metrics::new();
        metrics.record_reading_published();
        metrics.record_reading_published();
        metrics.record_command_applied();
        metrics.record_command_failed();

        let first = metrics.report(None);
        assert_eq!(first.readings_published, 2);
        assert_eq!(first.readings_in_interval, 2);
        assert_eq!(first.commands_in_interval, 2);

        let second = metrics.report(None);
        assert_eq!(second.readings_published, 2);
        assert_eq!(second.readings_in_interval, 0);
        assert_eq!(second.commands_in_interval, 0);
    }

    #[test]
    fn test_unreachable_threshold() {
        let metrics = Metrics::new();
        let summary = metrics.report(Some(Duration::from_secs(90)));
        assert!(summary.warn_if_unreachable(Duration::from_secs(60)));
        assert!(!summary.warn_if_unreachable(Duration::from_secs(120)));

        let connected = metrics.report(None);
        assert!(!connected.warn_if_unreachable(Duration::from_secs(0)));
    }
}
