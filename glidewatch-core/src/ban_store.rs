//! Temporary ban store with lazy expiry and login enforcement.
//!
//! A record only stores when the ban started; whether it is still active is
//! computed on every read against the current ban duration, so a config
//! reload shortens or extends bans already in place.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{ConfigHandle, DetectionConfig, MessageTemplates};
use crate::host::SessionControl;
use crate::types::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub actor_id: ActorId,
    pub actor_name: String,
    pub ban_start: DateTime<Utc>,
}

impl BanRecord {
    /// End of the ban; saturates at the latest representable instant.
    pub fn ends_at(&self, duration: Duration) -> DateTime<Utc> {
        self.ban_start
            .checked_add_signed(duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_active(&self, now: DateTime<Utc>, duration: Duration) -> bool {
        now < self.ends_at(duration)
    }
}

/// Outcome of a session-start attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LoginDecision {
    Allow,
    Deny { remaining_minutes: i64, message: String },
}

impl LoginDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LoginDecision::Allow)
    }
}

/// An active ban as listed by the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBan {
    pub actor_id: ActorId,
    pub actor_name: String,
    pub ban_start: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub remaining_minutes: i64,
}

pub struct BanStore {
    bans: DashMap<ActorId, BanRecord>,
    config: Arc<ConfigHandle<DetectionConfig>>,
    sessions: Arc<dyn SessionControl>,
    clock: Arc<dyn Clock>,
}

impl BanStore {
    pub fn new(
        config: Arc<ConfigHandle<DetectionConfig>>,
        sessions: Arc<dyn SessionControl>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bans: DashMap::new(),
            config,
            sessions,
            clock,
        }
    }

    /// Insert or refresh a ban and terminate the actor's session.
    pub fn ban(&self, actor: ActorId, actor_name: &str) {
        let config = self.config.current();
        let now = self.clock.now();
        self.bans.insert(
            actor,
            BanRecord {
                actor_id: actor,
                actor_name: actor_name.to_string(),
                ban_start: now,
            },
        );

        let minutes = config.ban_duration_minutes.to_string();
        let message =
            MessageTemplates::render_colored(&config.messages.ban_kick, &[("%time%", &minutes)]);
        self.sessions.terminate(actor, &message);

        debug!(
            actor = %actor,
            name = actor_name,
            minutes = config.ban_duration_minutes,
            "Ban recorded"
        );
    }

    /// True iff a record exists and has not expired. An expired record is
    /// removed on the way out.
    pub fn is_banned(&self, actor: ActorId) -> bool {
        let now = self.clock.now();
        let duration = self.config.current().ban_duration();

        if let Some((_, record)) = self
            .bans
            .remove_if(&actor, |_, record| !record.is_active(now, duration))
        {
            debug!(actor = %actor, name = %record.actor_name, "Ban expired");
            return false;
        }
        self.bans.contains_key(&actor)
    }

    /// Remove a ban. Returns the removed record, if any.
    pub fn unban(&self, actor: ActorId) -> Option<BanRecord> {
        let removed = self.bans.remove(&actor).map(|(_, record)| record);
        if let Some(record) = &removed {
            info!(actor = %actor, name = %record.actor_name, "Ban lifted");
        }
        removed
    }

    /// Whole minutes until the ban ends, rounded up; 0 when not banned.
    pub fn remaining_ban_minutes(&self, actor: ActorId) -> i64 {
        let now = self.clock.now();
        let duration = self.config.current().ban_duration();
        self.bans
            .get(&actor)
            .map(|record| remaining_minutes(record.ends_at(duration), now))
            .unwrap_or(0)
    }

    /// Decide whether a session may start.
    pub fn check_login(&self, actor: ActorId) -> LoginDecision {
        if !self.is_banned(actor) {
            return LoginDecision::Allow;
        }
        let remaining = self.remaining_ban_minutes(actor);
        if remaining == 0 {
            return LoginDecision::Allow;
        }

        let config = self.config.current();
        let minutes = remaining.to_string();
        let message =
            MessageTemplates::render_colored(&config.messages.ban_login, &[("%time%", &minutes)]);
        debug!(actor = %actor, remaining_minutes = remaining, "Login refused");
        LoginDecision::Deny {
            remaining_minutes: remaining,
            message,
        }
    }

    /// Drop every expired record. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let duration = self.config.current().ban_duration();
        let before = self.bans.len();
        self.bans.retain(|_, record| record.is_active(now, duration));
        let removed = before.saturating_sub(self.bans.len());
        if removed > 0 {
            debug!(removed, remaining = self.bans.len(), "Swept expired bans");
        }
        removed
    }

    /// Active bans, oldest first.
    pub fn active_bans(&self) -> Vec<ActiveBan> {
        let now = self.clock.now();
        let duration = self.config.current().ban_duration();
        let mut bans: Vec<ActiveBan> = self
            .bans
            .iter()
            .filter(|entry| entry.is_active(now, duration))
            .map(|entry| {
                let ends_at = entry.ends_at(duration);
                ActiveBan {
                    actor_id: entry.actor_id,
                    actor_name: entry.actor_name.clone(),
                    ban_start: entry.ban_start,
                    ends_at,
                    remaining_minutes: remaining_minutes(ends_at, now),
                }
            })
            .collect();
        bans.sort_by_key(|ban| ban.ban_start);
        bans
    }

    /// Look up a ban record by actor name (case-insensitive).
    pub fn find_by_name(&self, name: &str) -> Option<BanRecord> {
        self.bans
            .iter()
            .find(|entry| entry.actor_name.eq_ignore_ascii_case(name))
            .map(|entry| entry.value().clone())
    }

    pub fn record(&self, actor: ActorId) -> Option<BanRecord> {
        self.bans.get(&actor).map(|entry| entry.value().clone())
    }

    /// Stored records, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}

fn remaining_minutes(ends_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (ends_at - now).num_milliseconds();
    if ms <= 0 {
        0
    } else {
        (ms + 59_999) / 60_000
    }
}
