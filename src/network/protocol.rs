//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message naming an event and carrying an
//! optional payload:
//!
//! ```json
//! {"event": "join-request", "data": {"roomid": "K9X2", "username": "alice"}}
//! {"event": "request-create-room"}
//! ```

use serde::{Deserialize, Serialize};

use crate::room::witch::{Witch, WitchId};
use crate::room::RoomId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Events sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Ask for a fresh room.
    RequestCreateRoom,

    /// Ask for a seat in an existing room.
    JoinRequest(JoinRequest),

    /// Claim a hit on a witch.
    PopWitch(WitchId),
}

/// Seat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Room code as typed by the player.
    pub roomid: String,
    /// Display name; not validated.
    pub username: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Events sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Reply to `request-create-room`.
    RoomCreated(RoomId),

    /// Outcome of a `join-request`.
    JoinResponse(JoinResponse),

    /// Both seats taken, countdown running.
    GameIsReady(Vec<ScoreEntry>),

    /// A witch enters play.
    SpawnWitch(Witch),

    /// The other player popped this witch.
    EnemyPop(WitchId),

    /// Authoritative scores.
    UpdateScore(Vec<ScoreEntry>),

    /// Match concluded; clients reset their state.
    EndGame(bool),

    /// Room was reclaimed for inactivity.
    RoomIsClosed(bool),

    /// A frame could not be understood.
    Error(String),
}

/// Result of a join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinResult {
    /// Seated.
    Success,
    /// Not seated; see the message.
    Fail,
}

/// Join outcome with a human-readable reason on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Outcome.
    pub result: JoinResult,
    /// Empty on success.
    pub message: String,
}

impl JoinResponse {
    /// Successful join.
    pub fn success() -> Self {
        Self {
            result: JoinResult::Success,
            message: String::new(),
        }
    }

    /// Failed join with a reason.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            result: JoinResult::Fail,
            message: message.into(),
        }
    }
}

/// One row of the score table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    /// Player display name.
    pub username: String,
    /// Current score.
    pub score: u32,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientEvent {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerEvent {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomCreated(_) => "room-created",
            ServerEvent::JoinResponse(_) => "join-response",
            ServerEvent::GameIsReady(_) => "game-is-ready",
            ServerEvent::SpawnWitch(_) => "spawn-witch",
            ServerEvent::EnemyPop(_) => "enemy-pop",
            ServerEvent::UpdateScore(_) => "update-score",
            ServerEvent::EndGame(_) => "end-game",
            ServerEvent::RoomIsClosed(_) => "room-is-closed",
            ServerEvent::Error(_) => "error",
        }
    }
}
