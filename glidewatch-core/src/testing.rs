//! In-memory collaborators for tests, benches and replays.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::host::{HostView, NotificationSink, SessionControl};
use crate::types::ActorId;

#[derive(Debug, Clone, Copy, Default)]
struct FakeActor {
    online: bool,
    bypass: bool,
    in_liquid: bool,
    view_distance: Option<u32>,
}

/// Scriptable host: every actor starts offline with no capabilities.
#[derive(Debug, Default)]
pub struct FakeHost {
    actors: Mutex<HashMap<ActorId, FakeActor>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, actor: ActorId, f: impl FnOnce(&mut FakeActor)) {
        f(self.actors.lock().entry(actor).or_default());
    }

    /// Mark an actor online with the given view distance.
    pub fn join(&self, actor: ActorId, view_distance: u32) {
        self.update(actor, |a| {
            a.online = true;
            a.view_distance = Some(view_distance);
        });
    }

    pub fn set_online(&self, actor: ActorId, online: bool) {
        self.update(actor, |a| a.online = online);
    }

    pub fn set_bypass(&self, actor: ActorId, bypass: bool) {
        self.update(actor, |a| a.bypass = bypass);
    }

    pub fn set_in_liquid(&self, actor: ActorId, in_liquid: bool) {
        self.update(actor, |a| a.in_liquid = in_liquid);
    }

    pub fn set_view_distance(&self, actor: ActorId, view_distance: Option<u32>) {
        self.update(actor, |a| a.view_distance = view_distance);
    }
}

impl HostView for FakeHost {
    fn is_online(&self, actor: ActorId) -> bool {
        self.actors.lock().get(&actor).is_some_and(|a| a.online)
    }

    fn has_bypass(&self, actor: ActorId) -> bool {
        self.actors.lock().get(&actor).is_some_and(|a| a.bypass)
    }

    fn is_in_liquid(&self, actor: ActorId) -> bool {
        self.actors.lock().get(&actor).is_some_and(|a| a.in_liquid)
    }

    fn view_distance(&self, actor: ActorId) -> Option<u32> {
        self.actors.lock().get(&actor).and_then(|a| a.view_distance)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    Detection {
        actor_name: String,
        window_secs: u64,
        chunk_count: usize,
        continuous_count: u32,
    },
    Ban {
        actor_name: String,
    },
}

/// Sink that keeps every notification in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<SinkMessage>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<SinkMessage> {
        self.messages.lock().clone()
    }

    pub fn detections(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| matches!(m, SinkMessage::Detection { .. }))
            .count()
    }

    pub fn bans(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| matches!(m, SinkMessage::Ban { .. }))
            .count()
    }
}

impl NotificationSink for RecordingSink {
    fn notify_detection(
        &self,
        actor_name: &str,
        window_secs: u64,
        chunk_count: usize,
        continuous_count: u32,
    ) {
        self.messages.lock().push(SinkMessage::Detection {
            actor_name: actor_name.to_string(),
            window_secs,
            chunk_count,
            continuous_count,
        });
    }

    fn notify_ban(&self, actor_name: &str) {
        self.messages.lock().push(SinkMessage::Ban {
            actor_name: actor_name.to_string(),
        });
    }
}

/// Session control that records terminations instead of enforcing them.
#[derive(Debug, Default)]
pub struct RecordingSessions {
    terminated: Mutex<Vec<(ActorId, String)>>,
    warned: Mutex<Vec<(ActorId, String)>>,
    staff: Mutex<Vec<String>>,
}

impl RecordingSessions {
    pub fn terminated(&self) -> Vec<(ActorId, String)> {
        self.terminated.lock().clone()
    }

    pub fn warned(&self) -> Vec<(ActorId, String)> {
        self.warned.lock().clone()
    }

    pub fn staff_notices(&self) -> Vec<String> {
        self.staff.lock().clone()
    }
}

impl SessionControl for RecordingSessions {
    fn terminate(&self, actor: ActorId, message: &str) {
        self.terminated.lock().push((actor, message.to_string()));
    }

    fn send_warning(&self, actor: ActorId, message: &str) {
        self.warned.lock().push((actor, message.to_string()));
    }

    fn notify_staff(&self, message: &str) {
        self.staff.lock().push(message.to_string());
    }
}
