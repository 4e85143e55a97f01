//! Narrow interfaces to the collaborators around the core.
//!
//! The host server answers presence and capability queries, enforces session
//! termination, and a messaging sink carries operator notifications. None of
//! these may block; implementations hand slow work off elsewhere.

use crate::types::ActorId;

/// Read-only queries against the live host.
pub trait HostView: Send + Sync {
    fn is_online(&self, actor: ActorId) -> bool;

    /// Permission-equivalent capability that exempts an actor from detection.
    fn has_bypass(&self, actor: ActorId) -> bool;

    /// Feet or eyes currently inside a liquid volume.
    fn is_in_liquid(&self, actor: ActorId) -> bool;

    /// Effective view distance, or `None` when the host cannot report it.
    fn view_distance(&self, actor: ActorId) -> Option<u32>;
}

/// Immediate session termination. A no-op for actors not connected.
pub trait SessionControl: Send + Sync {
    fn terminate(&self, actor: ActorId, message: &str);

    /// Deliver an in-game warning to the actor, if the host supports it.
    fn send_warning(&self, _actor: ActorId, _message: &str) {}

    /// Broadcast to online staff holding the notice capability.
    fn notify_staff(&self, _message: &str) {}
}

/// Fire-and-forget operator notifications. Failures stay inside the sink.
pub trait NotificationSink: Send + Sync {
    fn notify_detection(
        &self,
        actor_name: &str,
        window_secs: u64,
        chunk_count: usize,
        continuous_count: u32,
    );

    fn notify_ban(&self, actor_name: &str);
}

/// Sink that discards everything; used when no messaging backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify_detection(&self, _: &str, _: u64, _: usize, _: u32) {}

    fn notify_ban(&self, _: &str) {}
}
