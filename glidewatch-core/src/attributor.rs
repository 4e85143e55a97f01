//! Attribution of newly generated chunks to the nearest gliding actor.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::config::{ConfigHandle, DetectionConfig};
use crate::constants::attribution_radius;
use crate::engine::DetectionEngine;
use crate::host::HostView;
use crate::types::{ActorId, ChunkKey, Position, WorldId};
use crate::window::GenerationEvent;

/// An actor currently gliding in the chunk's world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateActor {
    pub id: ActorId,
    pub name: String,
    pub position: Position,
    /// Reported view distance; falls back to the host, then the server default.
    #[serde(default)]
    pub view_distance: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "actor", rename_all = "snake_case")]
pub enum Attribution {
    Attributed(ActorId),
    /// Key already attributed inside the retention window.
    Duplicate,
    /// No candidate within range.
    NoCandidate,
    Bypassed(ActorId),
    AboveHeight(ActorId),
}

pub struct ChunkAttributor {
    recent: DashMap<ChunkKey, DateTime<Utc>>,
    config: Arc<ConfigHandle<DetectionConfig>>,
    host: Arc<dyn HostView>,
    engine: Arc<DetectionEngine>,
    clock: Arc<dyn Clock>,
}

impl ChunkAttributor {
    pub fn new(
        config: Arc<ConfigHandle<DetectionConfig>>,
        host: Arc<dyn HostView>,
        engine: Arc<DetectionEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            recent: DashMap::new(),
            config,
            host,
            engine,
            clock,
        }
    }

    pub fn on_generation_candidate(
        &self,
        world: WorldId,
        chunk_x: i32,
        chunk_z: i32,
        candidates: &[CandidateActor],
    ) -> Attribution {
        let config = self.config.current();
        let now = self.clock.now();
        let key = ChunkKey::new(world, chunk_x, chunk_z);
        let fresh_after = now - config.dedup_retention();

        if self
            .recent
            .get(&key)
            .is_some_and(|seen| *seen >= fresh_after)
        {
            trace!(chunk = %key, "Duplicate generation ignored");
            return Attribution::Duplicate;
        }

        let Some(actor) = self.nearest(&key, candidates, &config) else {
            return Attribution::NoCandidate;
        };

        if self.host.has_bypass(actor.id) {
            return Attribution::Bypassed(actor.id);
        }
        if config.height_filter_enabled && actor.position.block_y() > config.height_threshold {
            trace!(actor = %actor.id, y = actor.position.block_y(), "Above height threshold");
            return Attribution::AboveHeight(actor.id);
        }

        match self.recent.entry(key) {
            Entry::Occupied(mut seen) => {
                if *seen.get() >= fresh_after {
                    return Attribution::Duplicate;
                }
                seen.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        self.engine.record_event(GenerationEvent {
            key,
            generation_time: now,
            actor_id: actor.id,
            actor_name: actor.name.clone(),
            position: actor.position,
        });
        Attribution::Attributed(actor.id)
    }

    /// Nearest candidate by planar distance within its attribution radius.
    /// On an exact tie the first candidate wins.
    fn nearest<'a>(
        &self,
        key: &ChunkKey,
        candidates: &'a [CandidateActor],
        config: &DetectionConfig,
    ) -> Option<&'a CandidateActor> {
        let (cx, cz) = key.center();
        let mut best: Option<(&CandidateActor, f64)> = None;

        for candidate in candidates {
            let view_distance = candidate
                .view_distance
                .or_else(|| self.host.view_distance(candidate.id))
                .unwrap_or(config.default_view_distance);
            let distance = candidate.position.planar_distance(cx, cz);
            if distance > attribution_radius(view_distance) {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((candidate, distance));
            }
        }
        best.map(|(candidate, _)| candidate)
    }

    /// Drop de-dup entries older than the retention window.
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - self.config.current().dedup_retention();
        let before = self.recent.len();
        self.recent.retain(|_, seen| *seen >= cutoff);
        let removed = before.saturating_sub(self.recent.len());
        if removed > 0 {
            debug!(removed, tracked = self.recent.len(), "Swept de-dup cache");
        }
        removed
    }

    pub fn tracked_keys(&self) -> usize {
        self.recent.len()
    }

    pub fn is_tracked(&self, key: &ChunkKey) -> bool {
        self.recent.contains_key(key)
    }
}
