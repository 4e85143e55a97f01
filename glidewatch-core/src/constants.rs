//! Centralized detection constants.
//!
//! Tunables that operators may change live in `config`; the values here are
//! fixed properties of the world model or of the detection heuristic.

// =====================================================
// World geometry
// =====================================================

/// Chunk edge length in blocks, as a shift (16 = 1 << 4)
pub const CHUNK_SIZE_SHIFT: i32 = 4;

/// Blocks per chunk edge
pub const CHUNK_SIZE_BLOCKS: f64 = 16.0;

/// Offset from a chunk's origin corner to its centre, in blocks
pub const CHUNK_CENTER_OFFSET: i32 = 8;

// =====================================================
// Attribution
// =====================================================

/// Attribution radius multiplier: radius = view_distance * 16 * ATTRIBUTION_RANGE_FACTOR
pub const ATTRIBUTION_RANGE_FACTOR: f64 = 1.5;

// =====================================================
// Detection heuristic
// =====================================================

/// Empirical multiplier in expected = (2v + 1) * EXPECTED_CHUNK_MULTIPLIER
pub const EXPECTED_CHUNK_MULTIPLIER: usize = 5;

/// Detection records retained per actor (diagnostic ring)
pub const HISTORY_CAPACITY: usize = 100;

// =====================================================
// Configuration bounds
// =====================================================

/// Upper bound for the detection window, cooldowns and de-dup retention (1 day)
pub const MAX_DETECTION_SECS: u64 = 86_400;

/// Upper bound for a temporary ban (365 days)
pub const MAX_BAN_MINUTES: u64 = 525_600;

/// Upper bound for forgetting idle offline actors (7 days)
pub const MAX_IDLE_RECLAIM_MINUTES: u64 = 10_080;

/// Upper bound for the tick and sweep periods (1 day)
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Chunks a legitimately flying actor is expected to load per window.
pub fn expected_chunks(view_distance: u32) -> usize {
    (2 * view_distance as usize + 1) * EXPECTED_CHUNK_MULTIPLIER
}

/// Maximum planar distance at which a generated chunk is attributed to an actor.
pub fn attribution_radius(view_distance: u32) -> f64 {
    view_distance as f64 * CHUNK_SIZE_BLOCKS * ATTRIBUTION_RANGE_FACTOR
}
