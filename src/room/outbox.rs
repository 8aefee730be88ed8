//! Outbound Events
//!
//! Room operations describe who should hear what by pushing envelopes.
//! The gateway delivers them, in order, once the operation has finished.

use crate::network::protocol::ServerEvent;
use crate::room::ConnectionId;

/// One event addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Recipient.
    pub to: ConnectionId,
    /// Event to deliver.
    pub event: ServerEvent,
}

/// Ordered list of envelopes produced by a room operation.
#[derive(Debug, Default)]
pub struct Outbox {
    envelopes: Vec<Envelope>,
}

impl Outbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address `event` to a single connection.
    pub fn send(&mut self, to: ConnectionId, event: ServerEvent) {
        self.envelopes.push(Envelope { to, event });
    }

    /// Address `event` to every connection in `recipients`.
    pub fn broadcast<I>(&mut self, recipients: I, event: ServerEvent)
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        for to in recipients {
            self.send(to, event.clone());
        }
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.envelopes.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    /// Events queued for `connection`, in order.
    pub fn events_for(&self, connection: ConnectionId) -> Vec<&ServerEvent> {
        self.envelopes
            .iter()
            .filter(|e| e.to == connection)
            .map(|e| &e.event)
            .collect()
    }

    /// Take every queued envelope, leaving the outbox empty.
    pub fn drain(&mut self) -> std::vec::Drain<'_, Envelope> {
        self.envelopes.drain(..)
    }
}
