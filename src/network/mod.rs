//! Network Layer
//!
//! WebSocket server, wire protocol, and the gateway event loop that owns
//! all rooms.

pub mod gateway;
pub mod protocol;
pub mod server;

pub use gateway::{Gateway, GatewayCommand, GatewayError, GatewayHandle, GatewayStats};
pub use protocol::{ClientEvent, JoinRequest, JoinResponse, JoinResult, ScoreEntry, ServerEvent};
pub use server::{GameServer, GameServerError, ServerConfig};
