//! Identifiers and spatial primitives shared by every component.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{CHUNK_CENTER_OFFSET, CHUNK_SIZE_SHIFT};

/// Stable identity of a monitored actor (session/player).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Identity of a world/dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub u64);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world#{}", self.0)
    }
}

/// Block-space position of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Block elevation (floored Y).
    pub fn block_y(&self) -> i32 {
        self.y.floor() as i32
    }

    /// Distance on the horizontal plane, ignoring elevation.
    pub fn planar_distance(&self, x: f64, z: f64) -> f64 {
        let dx = self.x - x;
        let dz = self.z - z;
        (dx * dx + dz * dz).sqrt()
    }
}

/// De-duplication identity of a generated chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    pub world: WorldId,
    pub chunk_x: i32,
    pub chunk_z: i32,
}

impl ChunkKey {
    pub fn new(world: WorldId, chunk_x: i32, chunk_z: i32) -> Self {
        Self {
            world,
            chunk_x,
            chunk_z,
        }
    }

    /// Block coordinates of the chunk centre on the horizontal plane.
    pub fn center(&self) -> (f64, f64) {
        let x = (self.chunk_x << CHUNK_SIZE_SHIFT) + CHUNK_CENTER_OFFSET;
        let z = (self.chunk_z << CHUNK_SIZE_SHIFT) + CHUNK_CENTER_OFFSET;
        (x as f64, z as f64)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}", self.world.0, self.chunk_x, self.chunk_z)
    }
}
