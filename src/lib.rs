//! # Witch Pop Server
//!
//! Room orchestrator for Witch Pop, a two-player arcade game where players
//! race to pop witches flying across a shared canvas.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WITCH POP SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  room/           - Match state (no I/O)                      │
//! │  ├── id.rs       - Room code generation                      │
//! │  ├── config.rs   - Timings, thresholds, policies             │
//! │  ├── witch.rs    - Witch spawn records                       │
//! │  ├── outbox.rs   - Outbound event envelopes                  │
//! │  ├── registry.rs - Live rooms keyed by code                  │
//! │  └── mod.rs      - Room state machine                        │
//! │                                                              │
//! │  scheduler.rs    - One-shot and repeating timers             │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── protocol.rs - Named event wire format                   │
//! │  ├── gateway.rs  - Single event loop owning all rooms        │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Event Loop
//!
//! All room state lives inside one [`network::Gateway`] task. Client events
//! and timer firings are queued to it and handled one at a time, so a room
//! transition always runs to completion before the next one starts. Rooms
//! never touch sockets: they write into an [`room::Outbox`] that the gateway
//! delivers afterwards.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod network;
pub mod room;
pub mod scheduler;

// Re-export commonly used types
pub use network::{ClientEvent, Gateway, GatewayHandle, GameServer, ServerConfig, ServerEvent};
pub use room::{ConnectionId, Room, RoomConfig, RoomError, RoomId, RoomPhase, RoomRegistry};
pub use scheduler::{Scheduler, TimerFire, TimerKind, TokioScheduler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Score at which a match is won.
pub const WIN_SCORE: u32 = 450;

/// Points credited for each popped witch.
pub const POINTS_PER_POP: u32 = 10;

/// Witches spawned when a match starts.
pub const INITIAL_WITCHES: u32 = 2;

/// Players seated in a full room.
pub const MAX_PLAYERS: usize = 2;
