//! Session Gateway
//!
//! The single event loop that owns every room. Connection tasks and timers
//! only ever talk to it through channels:
//!
//! ```text
//! connection tasks ──GatewayCommand──┐
//!                                    ├──▶ Gateway ──ServerEvent──▶ connection senders
//! scheduler tasks ───TimerFire───────┘       │
//!                                            └── RoomRegistry ── Room ...
//! ```
//!
//! Each command is handled to completion before the next is read, which
//! serializes every room transition and every registry mutation.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::network::protocol::{ClientEvent, JoinRequest, JoinResponse, ServerEvent};
use crate::room::id::is_well_formed;
use crate::room::{
    ConnectionId, Outbox, RoomConfig, RoomError, RoomId, RoomRegistry, TimerOutcome,
};
use crate::scheduler::{Scheduler, TimerFire, TokioScheduler};

/// Commands accepted by the gateway.
#[derive(Debug)]
pub enum GatewayCommand {
    /// A client connected; events for it go to `sender`.
    Connected {
        /// New connection.
        connection: ConnectionId,
        /// Outbound channel of the connection.
        sender: mpsc::Sender<ServerEvent>,
    },
    /// A client sent an event.
    Inbound {
        /// Sender of the event.
        connection: ConnectionId,
        /// Parsed event.
        event: ClientEvent,
    },
    /// A client went away.
    Disconnected {
        /// Closed connection.
        connection: ConnectionId,
    },
    /// Report counters.
    Stats(oneshot::Sender<GatewayStats>),
    /// Report whether a room is live.
    HasRoom(RoomId, oneshot::Sender<bool>),
}

/// Gateway counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GatewayStats {
    /// Live rooms.
    pub rooms: usize,
    /// Registered connections.
    pub connections: usize,
    /// Connections holding a seat.
    pub seated: usize,
}

/// Commands queued for the gateway before senders wait.
const COMMAND_BUFFER: usize = 1024;

/// Gateway errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The gateway task has stopped.
    #[error("gateway is not running")]
    Closed,
}

/// Cloneable handle for talking to a running gateway.
///
/// The command queue is bounded; when it is full, callers wait, so a client
/// flooding events only stalls its own reader.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    commands: mpsc::Sender<GatewayCommand>,
}

impl GatewayHandle {
    /// Register a connection and its outbound channel.
    pub async fn connect(
        &self,
        connection: ConnectionId,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Result<(), GatewayError> {
        self.submit(GatewayCommand::Connected { connection, sender }).await
    }

    /// Forward an event received from `connection`.
    pub async fn dispatch(
        &self,
        connection: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), GatewayError> {
        self.submit(GatewayCommand::Inbound { connection, event }).await
    }

    /// Report that `connection` closed.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<(), GatewayError> {
        self.submit(GatewayCommand::Disconnected { connection }).await
    }

    /// Fetch the gateway's counters.
    pub async fn stats(&self) -> Result<GatewayStats, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.submit(GatewayCommand::Stats(tx)).await?;
        rx.await.map_err(|_| GatewayError::Closed)
    }

    /// Ask whether a room with this code is live.
    pub async fn has_room(&self, id: RoomId) -> Result<bool, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.submit(GatewayCommand::HasRoom(id, tx)).await?;
        rx.await.map_err(|_| GatewayError::Closed)
    }

    async fn submit(&self, command: GatewayCommand) -> Result<(), GatewayError> {
        self.commands.send(command).await.map_err(|_| GatewayError::Closed)
    }
}

/// Connected client state.
struct ConnectedClient {
    /// Outbound channel.
    sender: mpsc::Sender<ServerEvent>,
    /// Room holding this client's seat.
    room: Option<RoomId>,
}

/// The event loop owning all rooms.
pub struct Gateway {
    registry: RoomRegistry,
    clients: HashMap<ConnectionId, ConnectedClient>,
    commands: mpsc::Receiver<GatewayCommand>,
    timers: mpsc::UnboundedReceiver<TimerFire>,
}

impl Gateway {
    /// Create a gateway and its handle. Must be called within a Tokio runtime.
    pub fn new(config: RoomConfig) -> (Self, GatewayHandle) {
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(timer_tx));
        Self::with_registry(RoomRegistry::new(config, scheduler), timers)
    }

    /// Create a gateway whose rooms draw from a seeded random source.
    pub fn with_rng(config: RoomConfig, rng: StdRng) -> (Self, GatewayHandle) {
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(timer_tx));
        Self::with_registry(RoomRegistry::with_rng(config, scheduler, rng), timers)
    }

    fn with_registry(
        registry: RoomRegistry,
        timers: mpsc::UnboundedReceiver<TimerFire>,
    ) -> (Self, GatewayHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let gateway = Self {
            registry,
            clients: HashMap::new(),
            commands,
            timers,
        };
        (gateway, GatewayHandle { commands: command_tx })
    }

    /// Process commands and timer fires until every handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(fire) = self.timers.recv() => self.handle_timer(fire),
            }
        }
        info!("Gateway stopped with {} live rooms", self.registry.len());
    }

    /// Handle one command to completion.
    pub fn handle_command(&mut self, command: GatewayCommand) {
        match command {
            GatewayCommand::Connected { connection, sender } => {
                debug!("Connection {} registered", connection);
                self.clients.insert(connection, ConnectedClient { sender, room: None });
            }
            GatewayCommand::Inbound { connection, event } => {
                self.handle_event(connection, event);
            }
            GatewayCommand::Disconnected { connection } => {
                let mut out = Outbox::new();
                self.drop_connection(connection, &mut out);
                self.deliver(out);
            }
            GatewayCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            GatewayCommand::HasRoom(id, reply) => {
                let _ = reply.send(self.registry.contains(&id));
            }
        }
    }

    /// Handle one timer fire to completion.
    pub fn handle_timer(&mut self, fire: TimerFire) {
        let Some(room) = self.registry.find_mut(&fire.room) else {
            debug!("Timer {} fired for gone room {}", fire.id, fire.room);
            return;
        };

        let mut out = Outbox::new();
        if let TimerOutcome::Closed(detached) = room.on_timer(&fire, &mut out) {
            self.registry.remove(&fire.room);
            for connection in detached {
                if let Some(client) = self.clients.get_mut(&connection) {
                    client.room = None;
                }
            }
        }
        self.deliver(out);
    }

    /// Current counters.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            rooms: self.registry.len(),
            connections: self.clients.len(),
            seated: self.clients.values().filter(|c| c.room.is_some()).count(),
        }
    }

    /// The registry, for inspection.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    fn handle_event(&mut self, connection: ConnectionId, event: ClientEvent) {
        if !self.clients.contains_key(&connection) {
            debug!("Event from unregistered connection {}", connection);
            return;
        }

        let mut out = Outbox::new();
        match event {
            ClientEvent::RequestCreateRoom => {
                let id = self.registry.create();
                out.send(connection, ServerEvent::RoomCreated(id));
            }
            ClientEvent::JoinRequest(request) => {
                if let Err(e) = self.handle_join(connection, request, &mut out) {
                    debug!("Join from {} refused: {}", connection, e);
                    out.send(connection, ServerEvent::JoinResponse(JoinResponse::fail(e.to_string())));
                }
            }
            ClientEvent::PopWitch(witch_id) => {
                let seat = self.clients.get(&connection).and_then(|c| c.room.clone());
                if let Some(room) = seat.and_then(|id| self.registry.find_mut(&id)) {
                    room.pop_witch(connection, witch_id, &mut out);
                }
            }
        }
        self.deliver(out);
    }

    fn handle_join(
        &mut self,
        connection: ConnectionId,
        request: JoinRequest,
        out: &mut Outbox,
    ) -> Result<(), RoomError> {
        if let Some(current) = self.clients.get(&connection).and_then(|c| c.room.clone()) {
            return Err(RoomError::AlreadySeated(current));
        }

        if !is_well_formed(&request.roomid) {
            return Err(RoomError::RoomNotFound);
        }

        let id = RoomId::new(request.roomid);
        let room = self.registry.find_mut(&id).ok_or(RoomError::RoomNotFound)?;
        room.join(connection, request.username, out)?;

        if let Some(client) = self.clients.get_mut(&connection) {
            client.room = Some(id);
        }
        Ok(())
    }

    /// Forget a connection and vacate its seat.
    fn drop_connection(&mut self, connection: ConnectionId, out: &mut Outbox) {
        let Some(client) = self.clients.remove(&connection) else {
            return;
        };
        debug!("Connection {} dropped", connection);

        if let Some(room) = client.room.and_then(|id| self.registry.find_mut(&id)) {
            room.disconnect(connection, out);
        }
    }

    /// Deliver envelopes in order. A connection whose channel is closed or
    /// full is dropped, which may queue further envelopes for its opponent.
    fn deliver(&mut self, mut out: Outbox) {
        while !out.is_empty() {
            let mut failed = Vec::new();

            for envelope in out.drain() {
                let Some(client) = self.clients.get(&envelope.to) else {
                    continue;
                };

                #[cfg(feature = "debug-tracing")]
                debug!("-> {} {}", envelope.to, envelope.event.name());

                if let Err(e) = client.sender.try_send(envelope.event) {
                    warn!("Send to {} failed: {}", envelope.to, e);
                    if !failed.contains(&envelope.to) {
                        failed.push(envelope.to);
                    }
                }
            }

            for connection in failed {
                self.drop_connection(connection, &mut out);
            }
        }
    }
}
