//! Room Registry
//!
//! The live rooms of one server, keyed by code. The registry is owned by
//! the gateway's event loop, so code generation and insertion happen in a
//! single step and two rooms can never receive the same code.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::room::id::generate_room_id;
use crate::room::{Room, RoomConfig, RoomId};
use crate::scheduler::Scheduler;

/// Manages all live rooms.
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    config: RoomConfig,
    scheduler: Arc<dyn Scheduler>,
    rng: StdRng,
}

impl RoomRegistry {
    /// Create an empty registry seeded from OS entropy.
    pub fn new(config: RoomConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_rng(config, scheduler, StdRng::from_entropy())
    }

    /// Create an empty registry with an explicit random source.
    pub fn with_rng(config: RoomConfig, scheduler: Arc<dyn Scheduler>, rng: StdRng) -> Self {
        Self {
            rooms: HashMap::new(),
            config,
            scheduler,
            rng,
        }
    }

    /// Create a room under a fresh code and return the code.
    pub fn create(&mut self) -> RoomId {
        let rooms = &self.rooms;
        let id = generate_room_id(&mut self.rng, |candidate| rooms.contains_key(candidate));

        let room_rng = StdRng::seed_from_u64(self.rng.gen());
        let room = Room::new(id.clone(), self.config.clone(), self.scheduler.clone(), room_rng);
        self.rooms.insert(id.clone(), room);
        id
    }

    /// Look up a room.
    pub fn find(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Look up a room for mutation.
    pub fn find_mut(&mut self, id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    /// Remove a room. Removing an absent code is a no-op.
    pub fn remove(&mut self, id: &RoomId) -> Option<Room> {
        let removed = self.rooms.remove(id);
        if removed.is_some() {
            debug!("Room {} removed from registry", id);
        }
        removed
    }

    /// True if a room with this code is live.
    pub fn contains(&self, id: &RoomId) -> bool {
        self.rooms.contains_key(id)
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True if no room is live.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Codes of every live room.
    pub fn ids(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.keys()
    }
}
