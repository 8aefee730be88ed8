//! Witch Spawns
//!
//! A witch is only a spawn record on the server. Clients animate it from
//! its start position, speed and heading; the server just remembers which
//! ids are still in flight.

use std::f64::consts::TAU;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identifier of a witch within one match.
pub type WitchId = u32;

/// Width of the area witches spawn in.
pub const SPAWN_WIDTH: f64 = 850.0;

/// Height of the area witches spawn in.
pub const SPAWN_HEIGHT: f64 = 500.0;

const BASE_SPEED_MIN: f64 = 5.0;
const BASE_SPEED_MAX: f64 = 8.0;

/// Later witches fly faster by one unit per this many spawns.
const SPEED_RAMP: f64 = 5.0;

/// A witch entering play, as broadcast to both players.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Witch {
    /// Match-unique identifier, used to correlate pops.
    pub id: WitchId,
    /// Horizontal start position.
    pub pos_x: u32,
    /// Vertical start position.
    pub pos_y: u32,
    /// Flight speed.
    pub speed: u32,
    /// Heading in radians, in `[0, 2π)`.
    pub direction: f64,
}

impl Witch {
    /// Roll a witch with identifier `id`.
    ///
    /// `spawned` is the number of witches issued in the match including
    /// this one; it drives the speed ramp.
    pub fn random<R: Rng + ?Sized>(id: WitchId, spawned: u32, rng: &mut R) -> Self {
        let base_speed = rng.gen_range(BASE_SPEED_MIN..=BASE_SPEED_MAX);

        Self {
            id,
            pos_x: rng.gen_range(0.0..=SPAWN_WIDTH).round() as u32,
            pos_y: rng.gen_range(0.0..=SPAWN_HEIGHT).round() as u32,
            speed: (base_speed + f64::from(spawned) / SPEED_RAMP).round() as u32,
            direction: rng.gen_range(0.0..TAU),
        }
    }
}

/// Number of witches that should be in flight once `spawned` have been
/// issued in the current match.
pub fn target_population(spawned: u32) -> usize {
    ((spawned + 20) / 10) as usize
}
