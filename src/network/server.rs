//! WebSocket Game Server
//!
//! Async WebSocket server for player connections.
//! Each connection gets a reader loop and a writer task; everything they
//! learn or need goes through the [`Gateway`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::network::gateway::{Gateway, GatewayError, GatewayHandle};
use crate::network::protocol::{ClientEvent, ServerEvent};
use crate::room::config::parse_var;
use crate::room::{ConfigError, ConnectionId, RoomConfig};

/// Outbound events buffered per connection before it counts as dead.
const OUTBOUND_BUFFER: usize = 256;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Settings applied to every room.
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9099)),
            max_connections: 1000,
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
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
            bind_addr: parse_var(&lookup, "WITCH_BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            max_connections: parse_var(&lookup, "WITCH_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            room: RoomConfig::from_lookup(&lookup)?,
        })
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The gateway stopped.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Gateway handle.
    gateway: GatewayHandle,
    /// Open WebSocket connections.
    active: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server and start its gateway.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let (gateway, handle) = Gateway::new(config.room.clone());
        tokio::spawn(gateway.run());
        Self::with_gateway(config, handle)
    }

    /// Create a server in front of an already running gateway.
    pub fn with_gateway(config: ServerConfig, gateway: GatewayHandle) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            gateway,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.active.load(Ordering::Relaxed) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let gateway = self.gateway.clone();
        let active = self.active.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        active.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    active.fetch_sub(1, Ordering::Relaxed);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
            let connection = ConnectionId::new();

            if gateway.connect(connection, event_tx.clone()).await.is_err() {
                error!("Gateway unavailable, dropping {}", addr);
                active.fetch_sub(1, Ordering::Relaxed);
                return;
            }
            debug!("Client {} is connection {}", addr, connection);

            // Spawn event writer task
            let sender_task = tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    let text = match event.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize {}: {}", event.name(), e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming frames
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let event = match ClientEvent::from_json(&text) {
                                    Ok(e) => e,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = event_tx.try_send(ServerEvent::Error(
                                            "Invalid message format".to_string(),
                                        ));
                                        continue;
                                    }
                                };

                                if gateway.dispatch(connection, event).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Pings are answered by tungstenite; binary frames are not part of the protocol.
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            let _ = gateway.disconnect(connection).await;
            sender_task.abort();
            active.fetch_sub(1, Ordering::Relaxed);

            info!("Client {} cleaned up", addr);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get open connection count.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Get live room count.
    pub async fn room_count(&self) -> Result<usize, GameServerError> {
        Ok(self.gateway.stats().await?.rooms)
    }

    /// Handle to the server's gateway.
    pub fn gateway(&self) -> &GatewayHandle {
        &self.gateway
    }
}
