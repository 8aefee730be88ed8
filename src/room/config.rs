//! Room Configuration
//!
//! Timings, thresholds and the two behaviours deployments disagree on:
//! what counts as activity for the inactivity timer, and what happens to a
//! running match when a player leaves.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::{INITIAL_WITCHES, POINTS_PER_POP, WIN_SCORE};

/// Which events rearm a room's inactivity timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InactivityPolicy {
    /// Joins, the ready broadcast and match start only. A long match can be
    /// closed while it is still being played.
    #[default]
    SeatingOnly,
    /// Everything in [`Self::SeatingOnly`] plus every successful pop.
    AnyActivity,
}

impl FromStr for InactivityPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seating" | "seating-only" => Ok(Self::SeatingOnly),
            "activity" | "any-activity" => Ok(Self::AnyActivity),
            other => Err(ConfigError::InvalidValue {
                name: "inactivity policy",
                value: other.to_string(),
            }),
        }
    }
}

/// What a running match does when one player disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectPolicy {
    /// Finish the match: clear witches, zero scores, tell the remaining
    /// player the game ended.
    #[default]
    ResetMatch,
    /// Drop the player and stop the match without notifying anyone.
    SilentRemoval,
}

impl FromStr for DisconnectPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" | "reset-match" => Ok(Self::ResetMatch),
            "silent" | "silent-removal" => Ok(Self::SilentRemoval),
            other => Err(ConfigError::InvalidValue {
                name: "disconnect policy",
                value: other.to_string(),
            }),
        }
    }
}

/// Configuration shared by every room of a server.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Delay between the second seat and the first witches.
    pub countdown: Duration,
    /// Period of the inactivity timer.
    pub inactivity_timeout: Duration,
    /// Score that wins a match.
    pub win_score: u32,
    /// Points per popped witch.
    pub points_per_pop: u32,
    /// Witches spawned when a match starts.
    pub initial_witches: u32,
    /// Which events rearm the inactivity timer.
    pub inactivity_policy: InactivityPolicy,
    /// Reaction to a disconnect mid-match.
    pub disconnect_policy: DisconnectPolicy,
    /// Start a new countdown right after a finish if both players stayed.
    ///
    /// When false, a finished room keeps both players seated in
    /// [`WaitingForPlayers`](super::RoomPhase::WaitingForPlayers). It only arms
    /// again after one of them leaves and a new player takes the seat, and
    /// until then further join attempts are refused as full.
    pub rearm_after_finish: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_millis(4000),
            inactivity_timeout: Duration::from_secs(5 * 60),
            win_score: WIN_SCORE,
            points_per_pop: POINTS_PER_POP,
            initial_witches: INITIAL_WITCHES,
            inactivity_policy: InactivityPolicy::default(),
            disconnect_policy: DisconnectPolicy::default(),
            rearm_after_finish: true,
        }
    }
}

impl RoomConfig {
    /// Create config from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            countdown: parse_var(&lookup, "WITCH_COUNTDOWN_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.countdown),
            inactivity_timeout: match parse_var::<_, u64>(&lookup, "WITCH_INACTIVITY_SECS")? {
                // A zero period would never let the timer tick.
                Some(0) => {
                    return Err(ConfigError::InvalidValue {
                        name: "WITCH_INACTIVITY_SECS",
                        value: "0".to_string(),
                    })
                }
                Some(secs) => Duration::from_secs(secs),
                None => defaults.inactivity_timeout,
            },
            win_score: parse_var(&lookup, "WITCH_WIN_SCORE")?.unwrap_or(defaults.win_score),
            points_per_pop: defaults.points_per_pop,
            initial_witches: defaults.initial_witches,
            inactivity_policy: parse_var(&lookup, "WITCH_INACTIVITY_POLICY")?
                .unwrap_or(defaults.inactivity_policy),
            disconnect_policy: parse_var(&lookup, "WITCH_DISCONNECT_POLICY")?
                .unwrap_or(defaults.disconnect_policy),
            rearm_after_finish: parse_var(&lookup, "WITCH_REARM_AFTER_FINISH")?
                .unwrap_or(defaults.rearm_after_finish),
        })
    }
}

/// Parse an optional variable, reporting malformed values by name.
pub(crate) fn parse_var<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable or setting name.
        name: &'static str,
        /// Raw value found.
        value: String,
    },
}
