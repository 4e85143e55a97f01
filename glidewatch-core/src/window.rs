//! Per-actor detection state.
//!
//! - `WindowState`: plain data plus window maintenance, no policy
//! - `ActorWindow`: the state behind a per-actor mutex so compound updates
//!   (counter + cooldown stamp, window clear + gliding flag) are observed
//!   atomically by the tick and the event path

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::constants::HISTORY_CAPACITY;
use crate::types::{ActorId, ChunkKey, Position};

/// A genuinely-new chunk generation attributed to one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvent {
    pub key: ChunkKey,
    pub generation_time: DateTime<Utc>,
    pub actor_id: ActorId,
    pub actor_name: String,
    pub position: Position,
}

/// Diagnostic record of one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub time: DateTime<Utc>,
    pub chunk_count: usize,
    pub continuous_count: u32,
}

#[derive(Debug, Clone)]
pub struct WindowState {
    pub continuous_count: u32,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub last_cooldown_time: Option<DateTime<Utc>>,
    pub in_cooldown: bool,
    pub dimension_switch_cooldown_until: Option<DateTime<Utc>>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_events: VecDeque<GenerationEvent>,
    pub gliding: bool,
    pub gliding_start_time: Option<DateTime<Utc>>,
    pub history: VecDeque<DetectionRecord>,
    pub last_activity: DateTime<Utc>,
}

impl WindowState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            continuous_count: 0,
            last_detection_time: None,
            last_cooldown_time: None,
            in_cooldown: false,
            dimension_switch_cooldown_until: None,
            window_start: None,
            window_events: VecDeque::new(),
            gliding: false,
            gliding_start_time: None,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            last_activity: now,
        }
    }

    pub fn start_window(&mut self, now: DateTime<Utc>) {
        self.window_start = Some(now);
        self.window_events.clear();
        self.last_activity = now;
    }

    pub fn append(&mut self, event: GenerationEvent) {
        if self.window_start.is_none() {
            self.window_start = Some(event.generation_time);
        }
        if event.generation_time > self.last_activity {
            self.last_activity = event.generation_time;
        }
        self.window_events.push_back(event);
    }

    /// Drop events older than `now - window`. Returns the number removed.
    pub fn evict_expired(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        let before = self.window_events.len();
        self.window_events.retain(|e| e.generation_time >= cutoff);

        if let Some(start) = self.window_start {
            if start < cutoff {
                self.window_start = self
                    .window_events
                    .iter()
                    .map(|e| e.generation_time)
                    .min();
            }
        }
        before - self.window_events.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.window_events.len()
    }

    pub fn record_detection(&mut self, now: DateTime<Utc>) -> DetectionRecord {
        self.continuous_count = self.continuous_count.saturating_add(1);
        self.last_detection_time = Some(now);
        self.last_activity = now;

        let record = DetectionRecord {
            time: now,
            chunk_count: self.window_events.len(),
            continuous_count: self.continuous_count,
        };
        self.history.push_back(record);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
        record
    }

    pub fn reset_continuous(&mut self) {
        self.continuous_count = 0;
    }

    pub fn set_cooldown(&mut self, active: bool, now: DateTime<Utc>) {
        self.in_cooldown = active;
        if active {
            self.last_cooldown_time = Some(now);
        }
    }

    /// True while `now < last_cooldown_time + cooldown`. Clears the flag once
    /// the cooldown has elapsed.
    pub fn is_in_cooldown(&mut self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let Some(stamp) = self.last_cooldown_time.filter(|_| self.in_cooldown) else {
            return false;
        };
        let active = now < stamp + cooldown;
        if !active {
            self.in_cooldown = false;
        }
        active
    }

    pub fn set_dimension_cooldown(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.dimension_switch_cooldown_until = Some(now + duration);
    }

    pub fn dimension_cooldown_active(&self, now: DateTime<Utc>) -> bool {
        self.dimension_switch_cooldown_until
            .is_some_and(|until| now < until)
    }

    /// Update the gliding flag. Returns `true` on a false -> true transition;
    /// the caller decides whether to restart the window.
    pub fn set_gliding(&mut self, gliding: bool, now: DateTime<Utc>) -> bool {
        let started = gliding && !self.gliding;
        if started {
            self.gliding_start_time = Some(now);
        }
        self.gliding = gliding;
        self.last_activity = now;
        started
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

/// Read-only copy of an actor's state, safe to hand out of the lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub actor_id: ActorId,
    pub actor_name: String,
    pub continuous_count: u32,
    pub last_detection_time: Option<DateTime<Utc>>,
    pub in_cooldown: bool,
    pub window_start: Option<DateTime<Utc>>,
    pub chunk_count: usize,
    pub gliding: bool,
    pub gliding_start_time: Option<DateTime<Utc>>,
    pub history_len: usize,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ActorWindow {
    id: ActorId,
    name: Mutex<String>,
    state: Mutex<WindowState>,
}

impl ActorWindow {
    pub fn new(id: ActorId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: Mutex::new(name.into()),
            state: Mutex::new(WindowState::new(now)),
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Actors may be renamed between sessions.
    pub fn set_name(&self, name: &str) {
        let mut current = self.name.lock();
        if *current != name {
            *current = name.to_string();
        }
    }

    /// Run `f` with exclusive access to the state. Everything done inside the
    /// closure is one atomic unit for other readers and writers of this actor.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut WindowState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }

    pub fn continuous_count(&self) -> u32 {
        self.state.lock().continuous_count
    }

    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunk_count()
    }

    pub fn history(&self) -> Vec<DetectionRecord> {
        self.state.lock().history.iter().copied().collect()
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let actor_name = self.name();
        let state = self.state.lock();
        WindowSnapshot {
            actor_id: self.id,
            actor_name,
            continuous_count: state.continuous_count,
            last_detection_time: state.last_detection_time,
            in_cooldown: state.in_cooldown,
            window_start: state.window_start,
            chunk_count: state.chunk_count(),
            gliding: state.gliding,
            gliding_start_time: state.gliding_start_time,
            history_len: state.history.len(),
            last_activity: state.last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorldId;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn event(chunk_x: i32, at: DateTime<Utc>) -> GenerationEvent {
        GenerationEvent {
            key: ChunkKey::new(WorldId(0), chunk_x, 0),
            generation_time: at,
            actor_id: ActorId(1),
            actor_name: "Alex".into(),
            position: Position::default(),
        }
    }

    #[test]
    fn test_start_window_clears_events() {
        let mut state = WindowState::new(t0());
        state.append(event(0, t0()));
        state.append(event(1, t0()));
        assert_eq!(state.chunk_count(), 2);

        let later = t0() + Duration::seconds(5);
        state.start_window(later);
        assert_eq!(state.chunk_count(), 0);
        assert_eq!(state.window_start, Some(later));
    }

    #[test]
    fn test_append_adopts_start_when_empty() {
        let mut state = WindowState::new(t0());
        assert!(state.window_start.is_none());
        let at = t0() + Duration::seconds(2);
        state.append(event(0, at));
        assert_eq!(state.window_start, Some(at));
    }

    #[test]
    fn test_evict_expired_moves_start_to_oldest() {
        let mut state = WindowState::new(t0());
        state.start_window(t0());
        state.append(event(0, t0() + Duration::seconds(1)));
        state.append(event(1, t0() + Duration::seconds(20)));
        state.append(event(2, t0() + Duration::seconds(25)));

        let now = t0() + Duration::seconds(40);
        let removed = state.evict_expired(now, Duration::seconds(30));
        assert_eq!(removed, 1);
        assert_eq!(state.chunk_count(), 2);
        assert_eq!(state.window_start, Some(t0() + Duration::seconds(20)));
    }

    #[test]
    fn test_evict_expired_empties_window() {
        let mut state = WindowState::new(t0());
        state.start_window(t0());
        state.append(event(0, t0()));

        state.evict_expired(t0() + Duration::seconds(31), Duration::seconds(30));
        assert_eq!(state.chunk_count(), 0);
        assert!(state.window_start.is_none());
    }

    #[test]
    fn test_evict_expired_on_empty_window_is_noop() {
        let mut state = WindowState::new(t0());
        assert_eq!(state.evict_expired(t0(), Duration::seconds(30)), 0);
        assert!(state.window_start.is_none());
    }

    #[test]
    fn test_boundary_event_is_kept() {
        let mut state = WindowState::new(t0());
        state.append(event(0, t0()));
        state.evict_expired(t0() + Duration::seconds(30), Duration::seconds(30));
        assert_eq!(state.chunk_count(), 1, "event exactly at the cutoff stays");
    }

    #[test]
    fn test_record_detection_and_history_cap() {
        let mut state = WindowState::new(t0());
        for i in 0..(HISTORY_CAPACITY + 5) {
            state.record_detection(t0() + Duration::seconds(i as i64));
        }
        assert_eq!(state.continuous_count as usize, HISTORY_CAPACITY + 5);
        assert_eq!(state.history.len(), HISTORY_CAPACITY);
        assert_eq!(state.history.front().map(|r| r.continuous_count), Some(6));
    }

    #[test]
    fn test_cooldown_clears_lazily() {
        let mut state = WindowState::new(t0());
        let cooldown = Duration::seconds(3);
        state.set_cooldown(true, t0());

        assert!(state.is_in_cooldown(t0() + Duration::seconds(2), cooldown));
        assert!(state.in_cooldown);
        assert!(!state.is_in_cooldown(t0() + Duration::seconds(3), cooldown));
        assert!(!state.in_cooldown, "flag cleared on expired read");
    }

    #[test]
    fn test_dimension_cooldown() {
        let mut state = WindowState::new(t0());
        assert!(!state.dimension_cooldown_active(t0()));
        state.set_dimension_cooldown(t0(), Duration::seconds(30));
        assert!(state.dimension_cooldown_active(t0() + Duration::seconds(29)));
        assert!(!state.dimension_cooldown_active(t0() + Duration::seconds(30)));
    }

    #[test]
    fn test_set_gliding_reports_transition() {
        let mut state = WindowState::new(t0());
        assert!(state.set_gliding(true, t0()));
        assert!(!state.set_gliding(true, t0()));
        assert!(!state.set_gliding(false, t0()));
        assert!(state.set_gliding(true, t0() + Duration::seconds(1)));
        assert_eq!(state.gliding_start_time, Some(t0() + Duration::seconds(1)));
    }

    #[test]
    fn test_actor_window_snapshot() {
        let window = ActorWindow::new(ActorId(9), "Steve", t0());
        window.with_state(|s| {
            s.set_gliding(true, t0());
            s.start_window(t0());
            s.append(event(0, t0()));
            s.record_detection(t0());
        });
        window.set_name("Steve2");

        let snap = window.snapshot();
        assert_eq!(snap.actor_name, "Steve2");
        assert_eq!(snap.continuous_count, 1);
        assert_eq!(snap.chunk_count, 1);
        assert!(snap.gliding);
        assert_eq!(snap.history_len, 1);
    }
}
