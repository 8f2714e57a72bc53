//! Infrastructure - configuration, identity and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults, validation)
//! - `identity` - Gateway device id and reported IP address
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod identity;
pub mod metrics;

// Re-export commonly used types
pub use config::{Config, HardwareBackend};
pub use metrics::Metrics;
