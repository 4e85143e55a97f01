//! Glidewatch - map-running detection core
//!
//! Watches chunk generation caused by gliding actors and escalates repeated
//! bursts into temporary bans:
//! - Per-actor sliding windows of generation events (`window`)
//! - Attribution of new chunks to the nearest gliding actor (`attributor`)
//! - Periodic threshold/cooldown evaluation and escalation (`engine`)
//! - Temporary bans with lazy expiry and login enforcement (`ban_store`)
//!
//! The core is synchronous and runtime-agnostic. Collaborators (host queries,
//! session control, notifications, time) are injected as trait objects.

pub mod attributor;
pub mod ban_store;
pub mod clock;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod host;
pub mod logging;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod window;

pub use attributor::{Attribution, CandidateActor, ChunkAttributor};
pub use ban_store::{ActiveBan, BanRecord, BanStore, LoginDecision};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigHandle, DetectionConfig, MessageTemplates};
pub use engine::{ActorStatus, DetectionEngine, Outcome, ResetReason, TickReport};
pub use error::ConfigError;
pub use host::{HostView, NoopSink, NotificationSink, SessionControl};
pub use types::{ActorId, ChunkKey, Position, WorldId};
pub use window::{ActorWindow, DetectionRecord, GenerationEvent, WindowSnapshot};
