//! Room Codes
//!
//! Short codes players type to find each other's room. Each character is
//! an uppercase letter or a digit; the code only grows past
//! [`MIN_ROOM_ID_LEN`] when a freshly drawn code is already taken.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a freshly generated code before any collision.
pub const MIN_ROOM_ID_LEN: usize = 4;

const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

/// Identifier of a live room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap an existing code, e.g. one received from a client.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of characters in the code.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty code (never generated).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RoomId {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Draw a code of exactly `length` characters.
///
/// Every character first picks the letter or digit class with equal odds,
/// then a uniform member of that class.
pub fn random_code<R: Rng + ?Sized>(rng: &mut R, length: usize) -> RoomId {
    let code = (0..length)
        .map(|_| {
            let class = if rng.gen_bool(0.5) { LETTERS } else { DIGITS };
            class[rng.gen_range(0..class.len())] as char
        })
        .collect::<String>();
    RoomId(code)
}

/// Generate a code that `is_taken` rejects nowhere.
///
/// Starts at [`MIN_ROOM_ID_LEN`] and adds one character after every
/// collision, so the search always terminates.
pub fn generate_room_id<R, F>(rng: &mut R, is_taken: F) -> RoomId
where
    R: Rng + ?Sized,
    F: Fn(&RoomId) -> bool,
{
    let mut length = MIN_ROOM_ID_LEN;
    loop {
        let candidate = random_code(rng, length);
        if !is_taken(&candidate) {
            return candidate;
        }
        length += 1;
    }
}

/// True if every character is an uppercase ASCII letter or digit and the
/// code is at least [`MIN_ROOM_ID_LEN`] long.
pub fn is_well_formed(code: &str) -> bool {
    code.len() >= MIN_ROOM_ID_LEN
        && code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}
