//! Glidewatch Server Library
//!
//! Hosts the detection core as a service:
//! - Host bridge: presence registry, ordered event pump, kick/warn directives
//! - OneBot notifier for operator chat alerts
//! - HTTP API for the host plugin and for operators
//! - Config file loading with hot-reload
//! - Prometheus + JSON metrics

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod hotreload;
pub mod metrics;
pub mod notifier;
pub mod runtime;

pub use bridge::{HostDirective, HostEventPayload, HostRegistry, Presence};
pub use config::{AppConfig, ConfigSource, OneBotConfig};
pub use error::{NotifyError, ServerError};
pub use runtime::GuardRuntime;
