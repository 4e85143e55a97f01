//! Host Bridge: connects the host server's event feed to the detection core
//!
//! The host posts presence updates and gameplay events over HTTP. Handlers
//! forward them through a channel to a single pump task, so the core sees
//! events in arrival order:
//!
//! ```text
//! POST /host/events (tokio async)
//!       │
//!       ▼
//! HostEvent → mpsc channel → EventPump
//!       │                        │
//!       │                        ▼
//!       │           HostRegistry / ChunkAttributor / DetectionEngine
//!       │                        │
//!       ▼                        ▼
//! oneshot::Receiver ◄── oneshot::Sender (reply / flush barrier)
//! ```
//!
//! Session terminations and warnings the core issues are queued as
//! `HostDirective`s and handed back to the host in the next response.

use dashmap::DashMap;
use glidewatch_core::{
    ActorId, CandidateActor, ChunkAttributor, DetectionEngine, HostView,
    LoginDecision, Position, SessionControl, WorldId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace};

use crate::metrics::ServerMetrics;

// ============================================================================
// Live presence (read by the core through HostView)
// ============================================================================

/// Last reported state of an online actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub name: String,
    pub world: WorldId,
    pub position: Position,
    #[serde(default)]
    pub gliding: bool,
    #[serde(default)]
    pub in_liquid: bool,
    /// Holds the detection bypass permission
    #[serde(default)]
    pub bypass: bool,
    #[serde(default)]
    pub view_distance: Option<u32>,
}

/// Online actors as last reported by the host. An actor is online while it
/// has an entry.
#[derive(Debug, Default)]
pub struct HostRegistry {
    actors: DashMap<ActorId, Presence>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a presence report, returning the previous one.
    pub fn upsert(&self, actor: ActorId, presence: Presence) -> Option<Presence> {
        self.actors.insert(actor, presence)
    }

    pub fn remove(&self, actor: ActorId) -> Option<Presence> {
        self.actors.remove(&actor).map(|(_, presence)| presence)
    }

    pub fn get(&self, actor: ActorId) -> Option<Presence> {
        self.actors.get(&actor).map(|p| p.clone())
    }

    pub fn set_gliding(&self, actor: ActorId, gliding: bool) {
        if let Some(mut presence) = self.actors.get_mut(&actor) {
            presence.gliding = gliding;
        }
    }

    pub fn online_count(&self) -> usize {
        self.actors.len()
    }

    /// Gliding actors in `world`, ordered by id so attribution ties resolve
    /// the same way every time.
    pub fn gliding_in(&self, world: WorldId) -> Vec<CandidateActor> {
        let mut candidates: Vec<CandidateActor> = self
            .actors
            .iter()
            .filter(|entry| entry.gliding && entry.world == world)
            .map(|entry| CandidateActor {
                id: *entry.key(),
                name: entry.name.clone(),
                position: entry.position,
                view_distance: entry.view_distance,
            })
            .collect();
        candidates.sort_by_key(|c| c.id);
        candidates
    }
}

impl HostView for HostRegistry {
    fn is_online(&self, actor: ActorId) -> bool {
        self.actors.contains_key(&actor)
    }

    fn has_bypass(&self, actor: ActorId) -> bool {
        self.actors.get(&actor).is_some_and(|p| p.bypass)
    }

    fn is_in_liquid(&self, actor: ActorId) -> bool {
        self.actors.get(&actor).is_some_and(|p| p.in_liquid)
    }

    fn view_distance(&self, actor: ActorId) -> Option<u32> {
        self.actors.get(&actor).and_then(|p| p.view_distance)
    }
}

// ============================================================================
// Directives (core → host)
// ============================================================================

/// Action the host must carry out on its side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostDirective {
    /// Disconnect the actor with the given message
    Kick { actor: ActorId, message: String },
    /// Show the actor an in-game warning
    Warn { actor: ActorId, message: String },
    /// Show every online player with the notice permission
    StaffNotice { message: String },
}

/// Session control backed by a queue the host drains over HTTP.
pub struct KickQueue {
    registry: Arc<HostRegistry>,
    pending: Mutex<Vec<HostDirective>>,
}

impl KickQueue {
    pub fn new(registry: Arc<HostRegistry>) -> Self {
        Self {
            registry,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Take every pending directive.
    pub fn drain(&self) -> Vec<HostDirective> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl SessionControl for KickQueue {
    fn terminate(&self, actor: ActorId, message: &str) {
        if !self.registry.is_online(actor) {
            return;
        }
        debug!(actor = %actor, "Queued kick");
        self.pending.lock().push(HostDirective::Kick {
            actor,
            message: message.to_string(),
        });
    }

    fn send_warning(&self, actor: ActorId, message: &str) {
        if !self.registry.is_online(actor) {
            return;
        }
        self.pending.lock().push(HostDirective::Warn {
            actor,
            message: message.to_string(),
        });
    }

    fn notify_staff(&self, message: &str) {
        self.pending.lock().push(HostDirective::StaffNotice {
            message: message.to_string(),
        });
    }
}

// ============================================================================
// Host events (host → core)
// ============================================================================

/// One event as posted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEventPayload {
    /// Full presence report; also joins the actor
    Presence { actor: ActorId, presence: Presence },
    /// A chunk was generated for the first time. Without an explicit
    /// candidate list, the gliding actors in the registry are used.
    ChunkGenerated {
        world: WorldId,
        chunk_x: i32,
        chunk_z: i32,
        #[serde(default)]
        candidates: Option<Vec<CandidateActor>>,
    },
    Gliding {
        actor: ActorId,
        name: String,
        gliding: bool,
    },
    DimensionChange { actor: ActorId },
    Disconnect { actor: ActorId },
}

#[derive(Debug)]
pub enum HostEvent {
    Host(HostEventPayload),
    Login {
        actor: ActorId,
        name: String,
        reply: oneshot::Sender<LoginDecision>,
    },
    /// Answered once every earlier event has been handled
    Flush { reply: oneshot::Sender<()> },
}

pub type EventSender = mpsc::UnboundedSender<HostEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<HostEvent>;

pub fn create_bridge() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Applies host events to the registry and the core, one at a time.
pub struct EventPump {
    engine: Arc<DetectionEngine>,
    attributor: Arc<ChunkAttributor>,
    registry: Arc<HostRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl EventPump {
    pub fn new(
        engine: Arc<DetectionEngine>,
        attributor: Arc<ChunkAttributor>,
        registry: Arc<HostRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            engine,
            attributor,
            registry,
            metrics,
        }
    }

    pub fn handle(&self, event: HostEvent) {
        match event {
            HostEvent::Host(payload) => {
                self.metrics.record_host_event();
                self.apply(payload);
            }
            HostEvent::Login { actor, name, reply } => {
                let decision = self.engine.on_login_attempt(actor, &name);
                if !decision.is_allowed() {
                    info!(actor = %actor, name = %name, "Login refused, actor is banned");
                }
                let _ = reply.send(decision);
            }
            HostEvent::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn apply(&self, payload: HostEventPayload) {
        match payload {
            HostEventPayload::Presence { actor, presence } => {
                let name = presence.name.clone();
                let gliding = presence.gliding;
                let world = presence.world;
                let previous = self.registry.upsert(actor, presence);

                let was_gliding = previous.as_ref().is_some_and(|p| p.gliding);
                if was_gliding != gliding {
                    self.engine.on_gliding(actor, &name, gliding);
                }
                if previous.is_some_and(|p| p.world != world) {
                    self.engine.on_dimension_change(actor);
                }
            }
            HostEventPayload::ChunkGenerated {
                world,
                chunk_x,
                chunk_z,
                candidates,
            } => {
                let candidates = candidates.unwrap_or_else(|| self.registry.gliding_in(world));
                let result =
                    self.attributor
                        .on_generation_candidate(world, chunk_x, chunk_z, &candidates);
                trace!(%world, chunk_x, chunk_z, ?result, "Chunk generation handled");
            }
            HostEventPayload::Gliding {
                actor,
                name,
                gliding,
            } => {
                self.registry.set_gliding(actor, gliding);
                self.engine.on_gliding(actor, &name, gliding);
            }
            HostEventPayload::DimensionChange { actor } => {
                self.engine.on_dimension_change(actor);
            }
            HostEventPayload::Disconnect { actor } => {
                self.engine.on_disconnect(actor);
                self.registry.remove(actor);
            }
        }
    }

    /// Handle events until the channel closes or shutdown is signalled.
    pub async fn run(self, mut rx: EventReceiver, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        debug!("Host event pump stopped");
    }
}
