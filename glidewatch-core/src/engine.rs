//! Detection engine: per-actor windows, the periodic evaluation tick and
//! escalation to bans.
//!
//! Per actor the state is conceptually Idle (not gliding), Accumulating
//! (gliding, window open) or Cooldown (just triggered). Nothing is stored as
//! an explicit enum; the phase is derived from `WindowState` on each tick.
//!
//! Host queries and notifications never run while an actor's lock is held.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::ban_store::{BanStore, LoginDecision};
use crate::clock::Clock;
use crate::config::{ConfigHandle, DetectionConfig, MessageTemplates};
use crate::constants::expected_chunks;
use crate::host::{HostView, NotificationSink, SessionControl};
use crate::types::ActorId;
use crate::window::{ActorWindow, DetectionRecord, GenerationEvent, WindowSnapshot};

/// Why a continuous count was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    InLiquid,
    NotGliding,
    CooldownElapsed,
    Disconnected,
}

/// Result of evaluating one actor on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Offline,
    CoolingDown,
    Reset(ResetReason),
    /// Nothing to do: below threshold with no escalation in progress, or a
    /// reset condition with a count already at zero.
    Quiet,
    Detected { chunk_count: usize, continuous_count: u32 },
    /// Triggered during a dimension-switch cooldown: counted, not announced.
    Suppressed { chunk_count: usize, continuous_count: u32 },
    Banned { chunk_count: usize, continuous_count: u32 },
}

/// Aggregate of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub evaluated: usize,
    pub offline: usize,
    pub cooling_down: usize,
    pub resets: usize,
    pub detections: usize,
    pub suppressed: usize,
    pub bans: usize,
    pub reclaimed: usize,
}

impl TickReport {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Offline => self.offline += 1,
            Outcome::CoolingDown => self.cooling_down += 1,
            Outcome::Reset(_) => self.resets += 1,
            Outcome::Quiet => {}
            Outcome::Detected { .. } => self.detections += 1,
            Outcome::Suppressed { .. } => self.suppressed += 1,
            Outcome::Banned { .. } => {
                self.detections += 1;
                self.bans += 1;
            }
        }
    }
}

/// Admin-facing status of one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorStatus {
    pub actor_id: ActorId,
    pub actor_name: String,
    pub continuous_count: u32,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub banned: bool,
    pub remaining_ban_minutes: i64,
    pub chunk_count: usize,
    pub gliding: bool,
    pub history_len: usize,
}

pub struct DetectionEngine {
    windows: DashMap<ActorId, Arc<ActorWindow>>,
    config: Arc<ConfigHandle<DetectionConfig>>,
    bans: Arc<BanStore>,
    host: Arc<dyn HostView>,
    sessions: Arc<dyn SessionControl>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl DetectionEngine {
    pub fn new(
        config: Arc<ConfigHandle<DetectionConfig>>,
        bans: Arc<BanStore>,
        host: Arc<dyn HostView>,
        sessions: Arc<dyn SessionControl>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            windows: DashMap::new(),
            config,
            bans,
            host,
            sessions,
            sink,
            clock,
        }
    }

    pub fn bans(&self) -> &Arc<BanStore> {
        &self.bans
    }

    fn window_or_create(&self, actor: ActorId, name: &str) -> Arc<ActorWindow> {
        let now = self.clock.now();
        let window = self
            .windows
            .entry(actor)
            .or_insert_with(|| {
                debug!(actor = %actor, name, "Tracking new actor");
                Arc::new(ActorWindow::new(actor, name, now))
            })
            .clone();
        window.set_name(name);
        window
    }

    /// Append an attributed generation event to its actor's window.
    pub fn record_event(&self, event: GenerationEvent) {
        let window = self.window_or_create(event.actor_id, &event.actor_name);
        trace!(
            actor = %event.actor_id,
            chunk = %event.key,
            "Chunk generation recorded"
        );
        window.with_state(|s| s.append(event));
    }

    /// Gliding state change. A false -> true transition restarts the window.
    /// Returns `true` when a new window was started.
    pub fn on_gliding(&self, actor: ActorId, name: &str, gliding: bool) -> bool {
        if self.host.has_bypass(actor) || self.bans.is_banned(actor) {
            return false;
        }
        let now = self.clock.now();

        let window = match self.window(actor) {
            Some(window) => window,
            None if gliding => self.window_or_create(actor, name),
            None => return false,
        };

        let started = window.with_state(|s| {
            let started = s.set_gliding(gliding, now);
            if started {
                s.start_window(now);
            }
            started
        });

        if started {
            debug!(actor = %actor, name, "Gliding started, window opened");
        } else if !gliding {
            trace!(actor = %actor, name, "Gliding stopped");
        }
        started
    }

    /// World/dimension change: suppress announcements for a while.
    pub fn on_dimension_change(&self, actor: ActorId) {
        if self.host.has_bypass(actor) || self.bans.is_banned(actor) {
            return;
        }
        let Some(window) = self.window(actor) else {
            return;
        };
        let now = self.clock.now();
        let duration = self.config.current().dimension_switch_cooldown();
        window.with_state(|s| s.set_dimension_cooldown(now, duration));
        debug!(actor = %actor, "Dimension switch cooldown set");
    }

    /// Disconnect forfeits escalation progress; the window itself survives
    /// until the idle horizon passes.
    pub fn on_disconnect(&self, actor: ActorId) {
        let Some(window) = self.window(actor) else {
            return;
        };
        let now = self.clock.now();
        window.with_state(|s| {
            s.reset_continuous();
            s.touch(now);
        });
        debug!(actor = %actor, reason = ?ResetReason::Disconnected, "Continuous count reset");
    }

    pub fn on_login_attempt(&self, actor: ActorId, name: &str) -> LoginDecision {
        let decision = self.bans.check_login(actor);
        if !decision.is_allowed() {
            info!(actor = %actor, name, "Refused login of banned actor");
        }
        decision
    }

    /// One evaluation pass over every tracked actor, followed by idle reclaim.
    pub fn evaluate(&self) -> TickReport {
        let config = self.config.current();
        let now = self.clock.now();
        let windows: Vec<Arc<ActorWindow>> =
            self.windows.iter().map(|e| e.value().clone()).collect();

        let mut report = TickReport::default();
        for window in &windows {
            report.evaluated += 1;
            report.add(self.evaluate_actor(window, &config, now));
        }
        report.reclaimed = self.reclaim_idle_at(&config, now);

        if report.detections > 0 || report.bans > 0 {
            debug!(?report, "Evaluation tick");
        }
        report
    }

    fn evaluate_actor(
        &self,
        window: &ActorWindow,
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) -> Outcome {
        let actor = window.id();
        window.with_state(|s| s.evict_expired(now, config.time_window()));

        if !self.host.is_online(actor) {
            return Outcome::Offline;
        }

        let in_liquid = config.disable_detection_in_water && self.host.is_in_liquid(actor);
        let view_distance = self
            .host
            .view_distance(actor)
            .unwrap_or(config.default_view_distance);
        let expected = expected_chunks(view_distance);
        let cooldown = config.cooldown();

        let outcome = window.with_state(|s| {
            if s.is_in_cooldown(now, cooldown) {
                return Outcome::CoolingDown;
            }
            let suppressed = s.dimension_cooldown_active(now);

            if in_liquid || !s.gliding {
                let reason = if in_liquid {
                    ResetReason::InLiquid
                } else {
                    ResetReason::NotGliding
                };
                if s.continuous_count == 0 {
                    return Outcome::Quiet;
                }
                s.reset_continuous();
                return Outcome::Reset(reason);
            }

            let chunk_count = s.chunk_count();
            if chunk_count >= expected {
                let record: DetectionRecord = s.record_detection(now);
                s.set_cooldown(true, now);
                let continuous_count = record.continuous_count;
                if suppressed {
                    return Outcome::Suppressed {
                        chunk_count,
                        continuous_count,
                    };
                }
                if continuous_count >= config.continuous_threshold {
                    return Outcome::Banned {
                        chunk_count,
                        continuous_count,
                    };
                }
                return Outcome::Detected {
                    chunk_count,
                    continuous_count,
                };
            }

            if s.continuous_count > 0 && s.last_detection_time.is_some() {
                s.reset_continuous();
                return Outcome::Reset(ResetReason::CooldownElapsed);
            }
            Outcome::Quiet
        });

        self.announce(window, config, outcome);
        outcome
    }

    fn announce(&self, window: &ActorWindow, config: &DetectionConfig, outcome: Outcome) {
        let actor = window.id();
        match outcome {
            Outcome::Reset(reason) => {
                debug!(actor = %actor, ?reason, "Continuous count reset");
            }
            Outcome::Suppressed {
                chunk_count,
                continuous_count,
            } => {
                debug!(
                    actor = %actor,
                    chunk_count,
                    continuous_count,
                    "Triggered during dimension switch cooldown, not announced"
                );
            }
            Outcome::Detected {
                chunk_count,
                continuous_count,
            }
            | Outcome::Banned {
                chunk_count,
                continuous_count,
            } => {
                let name = window.name();
                let window_secs = config.time_window_secs;
                let secs = window_secs.to_string();
                let chunks = chunk_count.to_string();
                let count = continuous_count.to_string();
                let line = MessageTemplates::render(
                    &config.messages.detection_console,
                    &[
                        ("%player%", &name),
                        ("%time%", &secs),
                        ("%chunks%", &chunks),
                        ("%count%", &count),
                    ],
                );
                info!(actor = %actor, chunk_count, continuous_count, "{line}");
                self.sessions.notify_staff(&MessageTemplates::render_colored(
                    &config.messages.admin_detection,
                    &[
                        ("%player%", &name),
                        ("%time%", &secs),
                        ("%chunks%", &chunks),
                        ("%count%", &count),
                    ],
                ));

                self.sessions.send_warning(
                    actor,
                    &MessageTemplates::render_colored(&config.messages.detection_warning, &[]),
                );
                self.sink
                    .notify_detection(&name, window_secs, chunk_count, continuous_count);

                if matches!(outcome, Outcome::Banned { .. }) {
                    self.bans.ban(actor, &name);
                    let line = MessageTemplates::render(
                        &config.messages.ban_console,
                        &[("%player%", &name)],
                    );
                    info!(actor = %actor, "{line}");
                    self.sessions.notify_staff(&MessageTemplates::render_colored(
                        &config.messages.admin_ban,
                        &[("%player%", &name)],
                    ));
                    self.sink.notify_ban(&name);
                }
            }
            Outcome::Offline | Outcome::CoolingDown | Outcome::Quiet => {}
        }
    }

    /// Forget offline actors with no activity inside the idle horizon.
    pub fn reclaim_idle(&self) -> usize {
        let config = self.config.current();
        self.reclaim_idle_at(&config, self.clock.now())
    }

    fn reclaim_idle_at(&self, config: &DetectionConfig, now: DateTime<Utc>) -> usize {
        let cutoff = now - config.idle_horizon();
        let before = self.windows.len();
        self.windows.retain(|actor, window| {
            self.host.is_online(*actor) || window.with_state(|s| s.last_activity >= cutoff)
        });
        let reclaimed = before.saturating_sub(self.windows.len());
        if reclaimed > 0 {
            debug!(reclaimed, tracked = self.windows.len(), "Reclaimed idle actors");
        }
        reclaimed
    }

    pub fn window(&self, actor: ActorId) -> Option<Arc<ActorWindow>> {
        self.windows.get(&actor).map(|w| w.value().clone())
    }

    pub fn tracked_actors(&self) -> usize {
        self.windows.len()
    }

    pub fn snapshots(&self) -> Vec<WindowSnapshot> {
        let mut snapshots: Vec<WindowSnapshot> =
            self.windows.iter().map(|w| w.value().snapshot()).collect();
        snapshots.sort_by_key(|s| s.actor_id);
        snapshots
    }

    /// Diagnostic detection ring, oldest first.
    pub fn history(&self, actor: ActorId) -> Vec<DetectionRecord> {
        self.window(actor).map(|w| w.history()).unwrap_or_default()
    }

    pub fn status(&self, actor: ActorId) -> Option<ActorStatus> {
        let window = self.window(actor)?;
        let snap = window.snapshot();
        Some(ActorStatus {
            actor_id: actor,
            actor_name: snap.actor_name,
            continuous_count: snap.continuous_count,
            last_detection_time: snap.last_detection_time,
            banned: self.bans.is_banned(actor),
            remaining_ban_minutes: self.bans.remaining_ban_minutes(actor),
            chunk_count: snap.chunk_count,
            gliding: snap.gliding,
            history_len: snap.history_len,
        })
    }

    /// Status by actor name (case-insensitive). Falls back to the ban store
    /// for actors whose window was already reclaimed.
    pub fn status_by_name(&self, name: &str) -> Option<ActorStatus> {
        let tracked = self
            .windows
            .iter()
            .find(|w| w.value().name().eq_ignore_ascii_case(name))
            .map(|w| *w.key());
        if let Some(actor) = tracked {
            return self.status(actor);
        }

        let record = self.bans.find_by_name(name)?;
        let banned = self.bans.is_banned(record.actor_id);
        Some(ActorStatus {
            actor_id: record.actor_id,
            actor_name: record.actor_name,
            continuous_count: 0,
            last_detection_time: None,
            banned,
            remaining_ban_minutes: self.bans.remaining_ban_minutes(record.actor_id),
            chunk_count: 0,
            gliding: false,
            history_len: 0,
        })
    }
}
