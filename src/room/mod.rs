//! Room State Machine
//!
//! One isolated two-player match. A room seats players, counts down, spawns
//! witches, credits pops, finishes matches and eventually closes itself for
//! inactivity.
//!
//! ```text
//! WaitingForPlayers ──2nd join──▶ Armed ──countdown──▶ InProgress
//!        ▲                          │                      │
//!        └──────── disconnect ──────┴──── finish / leave ──┘
//!
//! any phase ──inactivity──▶ Closed
//! ```
//!
//! Rooms do no I/O. Outbound events go into an [`Outbox`]; timers are armed
//! through a [`Scheduler`] and come back as [`TimerFire`]s.

pub mod config;
pub mod id;
pub mod outbox;
pub mod registry;
pub mod witch;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::network::protocol::{JoinResponse, ScoreEntry, ServerEvent};
use crate::scheduler::{Scheduler, TimerFire, TimerHandle, TimerKind};
use crate::MAX_PLAYERS;

pub use config::{ConfigError, DisconnectPolicy, InactivityPolicy, RoomConfig};
pub use id::RoomId;
pub use outbox::{Envelope, Outbox};
pub use registry::RoomRegistry;
pub use witch::{Witch, WitchId};

/// Opaque handle to a client's message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Room phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Fewer than two players seated (or a finished match awaiting re-arm).
    WaitingForPlayers,
    /// Both seated, countdown running.
    Armed,
    /// Witches spawning, pops scored.
    InProgress,
    /// A player reached the win score; reset in progress.
    Finished,
    /// Reclaimed. Terminal.
    Closed,
}

/// A seated participant.
#[derive(Debug, Clone)]
pub struct Player {
    /// Channel handle.
    pub connection: ConnectionId,
    /// Display name.
    pub username: String,
    /// Current score.
    pub score: u32,
}

/// Reasons a join is refused. The messages are shown to players.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// Both seats are taken.
    #[error("Room is full")]
    RoomFull,

    /// No live room has this code.
    #[error("Room not found")]
    RoomNotFound,

    /// The connection already holds a seat.
    #[error("Already seated in room {0}")]
    AlreadySeated(RoomId),
}

/// What the gateway must do after a timer fire.
#[derive(Debug, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Nothing beyond delivering the outbox.
    Continue,
    /// The room closed; remove it and forget these seats.
    Closed(Vec<ConnectionId>),
}

/// One match and everything it owns.
pub struct Room {
    id: RoomId,
    config: RoomConfig,
    phase: RoomPhase,
    players: Vec<Player>,
    witch_serial: u32,
    alive_witches: BTreeSet<WitchId>,
    rng: StdRng,
    scheduler: Arc<dyn Scheduler>,
    inactivity_timer: Option<TimerHandle>,
    countdown_timer: Option<TimerHandle>,
}

impl Room {
    /// Create a room and start its inactivity timer.
    pub fn new(id: RoomId, config: RoomConfig, scheduler: Arc<dyn Scheduler>, rng: StdRng) -> Self {
        let inactivity_timer =
            scheduler.repeating(config.inactivity_timeout, id.clone(), TimerKind::Inactivity);
        info!("Room {} created", id);

        Self {
            id,
            config,
            phase: RoomPhase::WaitingForPlayers,
            players: Vec::with_capacity(MAX_PLAYERS),
            witch_serial: 0,
            alive_witches: BTreeSet::new(),
            rng,
            scheduler,
            inactivity_timer: Some(inactivity_timer),
            countdown_timer: None,
        }
    }

    /// Room code.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Current phase.
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Seated players in join order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Seated player for `connection`.
    pub fn player(&self, connection: ConnectionId) -> Option<&Player> {
        self.players.iter().find(|p| p.connection == connection)
    }

    /// Witch ids issued in the current match.
    pub fn witch_serial(&self) -> u32 {
        self.witch_serial
    }

    /// Witches currently in flight.
    pub fn alive_witches(&self) -> impl Iterator<Item = WitchId> + '_ {
        self.alive_witches.iter().copied()
    }

    /// Number of witches currently in flight.
    pub fn alive_count(&self) -> usize {
        self.alive_witches.len()
    }

    /// Handles of every seated player.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.players.iter().map(|p| p.connection).collect()
    }

    /// Current score table.
    pub fn score_table(&self) -> Vec<ScoreEntry> {
        self.players
            .iter()
            .map(|p| ScoreEntry {
                username: p.username.clone(),
                score: p.score,
            })
            .collect()
    }

    /// Seat a player.
    ///
    /// Every attempt counts as activity. On success the joiner receives a
    /// successful `join-response`; the second seat arms the countdown.
    pub fn join(
        &mut self,
        connection: ConnectionId,
        username: impl Into<String>,
        out: &mut Outbox,
    ) -> Result<(), RoomError> {
        if self.phase == RoomPhase::Closed {
            return Err(RoomError::RoomNotFound);
        }

        self.rearm_inactivity();

        if self.player(connection).is_some() {
            return Err(RoomError::AlreadySeated(self.id.clone()));
        }

        if self.players.len() >= MAX_PLAYERS || self.phase != RoomPhase::WaitingForPlayers {
            debug!("Room {} refused a join: full", self.id);
            return Err(RoomError::RoomFull);
        }

        let username = username.into();
        info!("{} joined room {}", username, self.id);
        self.players.push(Player {
            connection,
            username,
            score: 0,
        });
        out.send(connection, ServerEvent::JoinResponse(JoinResponse::success()));

        if self.players.len() == MAX_PLAYERS {
            self.arm(out);
        }

        Ok(())
    }

    /// Credit `connection` with popping `witch_id`.
    ///
    /// Unknown or already popped ids are ignored, so racing pops of the
    /// same witch credit exactly one player.
    pub fn pop_witch(&mut self, connection: ConnectionId, witch_id: WitchId, out: &mut Outbox) {
        if self.phase != RoomPhase::InProgress {
            return;
        }

        let Some(popper) = self.players.iter().position(|p| p.connection == connection) else {
            return;
        };

        if !self.alive_witches.remove(&witch_id) {
            debug!("Room {}: stale pop of witch {}", self.id, witch_id);
            return;
        }

        self.players[popper].score += self.config.points_per_pop;
        let score = self.players[popper].score;

        out.broadcast(
            self.players
                .iter()
                .filter(|p| p.connection != connection)
                .map(|p| p.connection),
            ServerEvent::EnemyPop(witch_id),
        );
        out.broadcast(self.connections(), ServerEvent::UpdateScore(self.score_table()));

        if self.config.inactivity_policy == InactivityPolicy::AnyActivity {
            self.rearm_inactivity();
        }

        if score >= self.config.win_score {
            info!(
                "Room {}: {} won with {}",
                self.id, self.players[popper].username, score
            );
            self.finish(out);
        } else {
            self.top_up(out);
        }
    }

    /// Remove the player on `connection`. Returns false if it was not seated.
    pub fn disconnect(&mut self, connection: ConnectionId, out: &mut Outbox) -> bool {
        let Some(index) = self.players.iter().position(|p| p.connection == connection) else {
            return false;
        };

        let player = self.players.remove(index);
        info!("{} left room {}", player.username, self.id);

        match self.phase {
            RoomPhase::Armed => {
                if let Some(countdown) = self.countdown_timer.take() {
                    countdown.cancel();
                }
                self.phase = RoomPhase::WaitingForPlayers;
            }
            RoomPhase::InProgress => match self.config.disconnect_policy {
                DisconnectPolicy::ResetMatch => {
                    self.reset_match(out);
                    self.phase = RoomPhase::WaitingForPlayers;
                }
                DisconnectPolicy::SilentRemoval => {
                    self.clear_match();
                    self.phase = RoomPhase::WaitingForPlayers;
                }
            },
            RoomPhase::WaitingForPlayers | RoomPhase::Finished | RoomPhase::Closed => {}
        }

        true
    }

    /// React to one of this room's timers.
    ///
    /// Fires from timers that have since been replaced or cancelled are
    /// ignored, as are fires arriving in the wrong phase.
    pub fn on_timer(&mut self, fire: &TimerFire, out: &mut Outbox) -> TimerOutcome {
        match fire.kind {
            TimerKind::Countdown => {
                let live = self.countdown_timer.as_ref().is_some_and(|t| t.matches(fire));
                if !live || self.phase != RoomPhase::Armed {
                    debug!("Room {}: ignoring stale {}", self.id, fire.id);
                    return TimerOutcome::Continue;
                }
                self.countdown_timer = None;
                self.start(out);
                TimerOutcome::Continue
            }
            TimerKind::Inactivity => {
                let live = self.inactivity_timer.as_ref().is_some_and(|t| t.matches(fire));
                if !live || self.phase == RoomPhase::Closed {
                    debug!("Room {}: ignoring stale {}", self.id, fire.id);
                    return TimerOutcome::Continue;
                }
                TimerOutcome::Closed(self.close(out))
            }
        }
    }

    /// Close the room: stop timers, notify and detach every player.
    pub fn close(&mut self, out: &mut Outbox) -> Vec<ConnectionId> {
        if self.phase == RoomPhase::Closed {
            return Vec::new();
        }

        info!("Closing room {}", self.id);
        self.phase = RoomPhase::Closed;
        self.inactivity_timer = None;
        self.countdown_timer = None;
        self.alive_witches.clear();

        let detached = self.connections();
        out.broadcast(detached.iter().copied(), ServerEvent::RoomIsClosed(true));
        self.players.clear();
        detached
    }

    fn arm(&mut self, out: &mut Outbox) {
        self.phase = RoomPhase::Armed;
        self.rearm_inactivity();
        info!("Room {} is ready", self.id);

        out.broadcast(self.connections(), ServerEvent::GameIsReady(self.score_table()));
        self.countdown_timer = Some(self.scheduler.once(
            self.config.countdown,
            self.id.clone(),
            TimerKind::Countdown,
        ));
    }

    fn start(&mut self, out: &mut Outbox) {
        self.phase = RoomPhase::InProgress;
        self.rearm_inactivity();
        info!("Room {}: match starting", self.id);
        self.spawn_witches(self.config.initial_witches, out);
    }

    fn finish(&mut self, out: &mut Outbox) {
        self.phase = RoomPhase::Finished;
        self.reset_match(out);

        if self.config.rearm_after_finish && self.players.len() == MAX_PLAYERS {
            self.arm(out);
        } else {
            self.phase = RoomPhase::WaitingForPlayers;
        }
    }

    /// Clear the field and tell whoever is still seated that the match is over.
    fn reset_match(&mut self, out: &mut Outbox) {
        self.clear_match();
        out.broadcast(self.connections(), ServerEvent::EndGame(true));
    }

    /// Drop every witch and zero every score in one step.
    fn clear_match(&mut self) {
        self.alive_witches.clear();
        self.witch_serial = 0;
        for player in &mut self.players {
            player.score = 0;
        }
    }

    fn top_up(&mut self, out: &mut Outbox) {
        let target = witch::target_population(self.witch_serial);
        let missing = target.saturating_sub(self.alive_witches.len());
        if missing > 0 {
            self.spawn_witches(missing as u32, out);
        }
    }

    fn spawn_witches(&mut self, count: u32, out: &mut Outbox) {
        for _ in 0..count {
            let id = self.witch_serial;
            self.witch_serial += 1;

            let witch = Witch::random(id, self.witch_serial, &mut self.rng);
            self.alive_witches.insert(id);
            out.broadcast(self.connections(), ServerEvent::SpawnWitch(witch));
        }
    }

    /// Cancel the inactivity timer and start a fresh one.
    fn rearm_inactivity(&mut self) {
        if let Some(old) = self.inactivity_timer.take() {
            old.cancel();
        }
        debug!("Room {}: inactivity timer rearmed", self.id);
        self.inactivity_timer = Some(self.scheduler.repeating(
            self.config.inactivity_timeout,
            self.id.clone(),
            TimerKind::Inactivity,
        ));
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("players", &self.players)
            .field("witch_serial", &self.witch_serial)
            .field("alive_witches", &self.alive_witches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use crate::{POINTS_PER_POP, WIN_SCORE};
    use rand::SeedableRng;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        room: Room,
        fires: mpsc::UnboundedReceiver<TimerFire>,
        alice: ConnectionId,
        bob: ConnectionId,
    }

    fn fixture(config: RoomConfig) -> Fixture {
        let (tx, fires) = mpsc::unbounded_channel();
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new(tx));
        let room = Room::new(RoomId::new("TEST"), config, scheduler, StdRng::seed_from_u64(42));
        Fixture {
            room,
            fires,
            alice: ConnectionId::new(),
            bob: ConnectionId::new(),
        }
    }

    /// Seat both players and run the countdown.
    async fn started(config: RoomConfig) -> Fixture {
        let mut f = fixture(config);
        let mut out = Outbox::new();
        f.room.join(f.alice, "alice", &mut out).unwrap();
        f.room.join(f.bob, "bob", &mut out).unwrap();

        let fire = f.fires.recv().await.unwrap();
        assert_eq!(fire.kind, TimerKind::Countdown);
        f.room.on_timer(&fire, &mut out);
        assert_eq!(f.room.phase(), RoomPhase::InProgress);
        f
    }

    fn table(rows: &[(&str, u32)]) -> Vec<ScoreEntry> {
        rows.iter()
            .map(|(name, score)| ScoreEntry {
                username: name.to_string(),
                score: *score,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_join_arms_room() {
        let mut f = fixture(RoomConfig::default());
        let mut out = Outbox::new();

        f.room.join(f.alice, "alice", &mut out).unwrap();
        assert_eq!(f.room.phase(), RoomPhase::WaitingForPlayers);
        f.room.join(f.bob, "bob", &mut out).unwrap();
        assert_eq!(f.room.phase(), RoomPhase::Armed);

        let ready = ServerEvent::GameIsReady(table(&[("alice", 0), ("bob", 0)]));
        let success = ServerEvent::JoinResponse(JoinResponse::success());
        assert_eq!(out.events_for(f.alice), vec![&success, &ready]);
        assert_eq!(out.events_for(f.bob), vec![&success, &ready]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_join_is_refused() {
        let mut f = fixture(RoomConfig::default());
        let mut out = Outbox::new();
        f.room.join(f.alice, "alice", &mut out).unwrap();
        f.room.join(f.bob, "bob", &mut out).unwrap();

        let carol = ConnectionId::new();
        let mut late = Outbox::new();
        assert_eq!(f.room.join(carol, "carol", &mut late), Err(RoomError::RoomFull));
        assert!(late.is_empty());
        assert_eq!(f.room.players().len(), 2);
        assert_eq!(f.room.phase(), RoomPhase::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_connection_cannot_sit_twice() {
        let mut f = fixture(RoomConfig::default());
        let mut out = Outbox::new();
        f.room.join(f.alice, "alice", &mut out).unwrap();

        let result = f.room.join(f.alice, "alice again", &mut out);
        assert_eq!(result, Err(RoomError::AlreadySeated(RoomId::new("TEST"))));
        assert_eq!(f.room.players().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_spawns_initial_witches() {
        let mut f = fixture(RoomConfig::default());
        let mut out = Outbox::new();
        f.room.join(f.alice, "alice", &mut out).unwrap();
        f.room.join(f.bob, "bob", &mut out).unwrap();

        let start = tokio::time::Instant::now();
        let fire = f.fires.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(4000));

        let mut out = Outbox::new();
        assert_eq!(f.room.on_timer(&fire, &mut out), TimerOutcome::Continue);
        assert_eq!(f.room.phase(), RoomPhase::InProgress);
        assert_eq!(f.room.alive_witches().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(f.room.witch_serial(), 2);

        let spawned: Vec<WitchId> = out
            .events_for(f.bob)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::SpawnWitch(w) => Some(w.id),
                _ => None,
            })
            .collect();
        assert_eq!(spawned, vec![0, 1]);
        assert_eq!(out.events_for(f.alice), out.events_for(f.bob));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_credits_popper_and_notifies_other() {
        let mut f = started(RoomConfig::default()).await;
        let mut out = Outbox::new();

        f.room.pop_witch(f.alice, 1, &mut out);

        assert_eq!(f.room.player(f.alice).unwrap().score, 10);
        assert_eq!(f.room.player(f.bob).unwrap().score, 0);
        assert!(!f.room.alive_witches().any(|id| id == 1));

        let scores = ServerEvent::UpdateScore(table(&[("alice", 10), ("bob", 0)]));
        let bob_events = out.events_for(f.bob);
        assert_eq!(bob_events[0], &ServerEvent::EnemyPop(1));
        assert_eq!(bob_events[1], &scores);

        let alice_events = out.events_for(f.alice);
        assert_eq!(alice_events[0], &scores);
        assert!(!alice_events.iter().any(|e| matches!(e, ServerEvent::EnemyPop(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_tops_up_population() {
        let mut f = started(RoomConfig::default()).await;
        let mut out = Outbox::new();

        f.room.pop_witch(f.bob, 0, &mut out);

        assert_eq!(f.room.alive_count(), 2);
        assert_eq!(f.room.alive_witches().collect::<Vec<_>>(), vec![1, 2]);
        let last = out.events_for(f.alice).pop().unwrap();
        assert!(matches!(last, ServerEvent::SpawnWitch(w) if w.id == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_pop_is_noop() {
        let mut f = started(RoomConfig::default()).await;
        let mut out = Outbox::new();

        f.room.pop_witch(f.alice, 99, &mut out);
        assert!(out.is_empty());
        assert_eq!(f.room.player(f.alice).unwrap().score, 0);

        // Racing pop of the same witch credits only the first.
        f.room.pop_witch(f.alice, 0, &mut out);
        let mut second = Outbox::new();
        f.room.pop_witch(f.bob, 0, &mut second);
        assert!(second.is_empty());
        assert_eq!(f.room.player(f.bob).unwrap().score, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_before_start_is_ignored() {
        let mut f = fixture(RoomConfig::default());
        let mut out = Outbox::new();
        f.room.join(f.alice, "alice", &mut out).unwrap();
        f.room.join(f.bob, "bob", &mut out).unwrap();

        let mut pop = Outbox::new();
        f.room.pop_witch(f.alice, 0, &mut pop);
        assert!(pop.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unseated_pop_is_ignored() {
        let mut f = started(RoomConfig::default()).await;
        let mut out = Outbox::new();
        f.room.pop_witch(ConnectionId::new(), 0, &mut out);
        assert!(out.is_empty());
        assert_eq!(f.room.alive_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaching_win_score_finishes_match() {
        let config = RoomConfig {
            win_score: 20,
            rearm_after_finish: false,
            ..Default::default()
        };
        let mut f = started(config).await;
        let mut out = Outbox::new();

        f.room.pop_witch(f.bob, 0, &mut out);
        f.room.pop_witch(f.alice, 1, &mut out);
        let next = f.room.alive_witches().next().unwrap();

        let mut finish = Outbox::new();
        f.room.pop_witch(f.alice, next, &mut finish);

        assert_eq!(f.room.alive_count(), 0);
        assert_eq!(f.room.witch_serial(), 0);
        assert!(f.room.players().iter().all(|p| p.score == 0));
        assert_eq!(f.room.phase(), RoomPhase::WaitingForPlayers);
        assert_eq!(f.room.players().len(), 2);
        assert_eq!(finish.events_for(f.alice).last(), Some(&&ServerEvent::EndGame(true)));
        assert_eq!(finish.events_for(f.bob).last(), Some(&&ServerEvent::EndGame(true)));

        // Without re-arming, the seated pair stays put and the room stays full.
        let carol = ConnectionId::new();
        let mut late = Outbox::new();
        assert_eq!(f.room.join(carol, "carol", &mut late), Err(RoomError::RoomFull));
        assert_eq!(f.room.phase(), RoomPhase::WaitingForPlayers);
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_to_default_win_score() {
        let mut f = started(RoomConfig::default()).await;
        let pops_to_win = WIN_SCORE / POINTS_PER_POP;

        for _ in 1..pops_to_win {
            let target = f.room.alive_witches().next().unwrap();
            let mut out = Outbox::new();
            f.room.pop_witch(f.alice, target, &mut out);
            assert_eq!(f.room.phase(), RoomPhase::InProgress);
        }
        assert_eq!(f.room.player(f.alice).unwrap().score, WIN_SCORE - POINTS_PER_POP);

        let target = f.room.alive_witches().next().unwrap();
        let mut finish = Outbox::new();
        f.room.pop_witch(f.alice, target, &mut finish);

        let winning = ServerEvent::UpdateScore(table(&[("alice", WIN_SCORE), ("bob", 0)]));
        let ready = ServerEvent::GameIsReady(table(&[("alice", 0), ("bob", 0)]));
        assert_eq!(
            finish.events_for(f.alice),
            vec![&winning, &ServerEvent::EndGame(true), &ready]
        );
        assert_eq!(
            finish.events_for(f.bob),
            vec![&ServerEvent::EnemyPop(target), &winning, &ServerEvent::EndGame(true), &ready]
        );

        assert!(f.room.players().iter().all(|p| p.score == 0));
        assert_eq!(f.room.alive_count(), 0);
        assert_eq!(f.room.witch_serial(), 0);
        assert_eq!(f.room.phase(), RoomPhase::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_rearms_when_both_stay() {
        let config = RoomConfig {
            win_score: 10,
            ..Default::default()
        };
        let mut f = started(config).await;
        let mut out = Outbox::new();

        f.room.pop_witch(f.alice, 0, &mut out);

        assert_eq!(f.room.phase(), RoomPhase::Armed);
        let events = out.events_for(f.bob);
        let end = events.iter().position(|e| **e == ServerEvent::EndGame(true)).unwrap();
        assert_eq!(
            events[end + 1],
            &ServerEvent::GameIsReady(table(&[("alice", 0), ("bob", 0)]))
        );

        // The new countdown restarts the match from witch 0.
        let fire = f.fires.recv().await.unwrap();
        let mut restart = Outbox::new();
        f.room.on_timer(&fire, &mut restart);
        assert_eq!(f.room.phase(), RoomPhase::InProgress);
        assert_eq!(f.room.alive_witches().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_match_resets() {
        let mut f = started(RoomConfig::default()).await;
        let mut out = Outbox::new();
        f.room.pop_witch(f.alice, 0, &mut out);

        let mut leave = Outbox::new();
        assert!(f.room.disconnect(f.bob, &mut leave));

        assert_eq!(f.room.phase(), RoomPhase::WaitingForPlayers);
        assert_eq!(f.room.alive_count(), 0);
        assert_eq!(f.room.witch_serial(), 0);
        assert_eq!(f.room.player(f.alice).unwrap().score, 0);
        assert_eq!(leave.events_for(f.alice), vec![&ServerEvent::EndGame(true)]);
        assert!(leave.events_for(f.bob).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_disconnect_sends_nothing() {
        let config = RoomConfig {
            disconnect_policy: DisconnectPolicy::SilentRemoval,
            ..Default::default()
        };
        let mut f = started(config).await;

        let mut out = Outbox::new();
        f.room.pop_witch(f.alice, 0, &mut out);
        assert_eq!(f.room.player(f.alice).unwrap().score, 10);

        let mut leave = Outbox::new();
        assert!(f.room.disconnect(f.bob, &mut leave));
        assert!(leave.is_empty());
        assert_eq!(f.room.phase(), RoomPhase::WaitingForPlayers);
        assert_eq!(f.room.alive_count(), 0);
        assert_eq!(f.room.witch_serial(), 0);
        assert_eq!(f.room.player(f.alice).unwrap().score, 0);

        // The next match opens from zero for both players.
        let carol = ConnectionId::new();
        let mut rejoin = Outbox::new();
        f.room.join(carol, "carol", &mut rejoin).unwrap();
        let ready = ServerEvent::GameIsReady(table(&[("alice", 0), ("carol", 0)]));
        assert_eq!(rejoin.events_for(f.alice), vec![&ready]);
        assert_eq!(rejoin.events_for(carol).last(), Some(&&ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_countdown_cancels_start() {
        let mut f = fixture(RoomConfig::default());
        let mut out = Outbox::new();
        f.room.join(f.alice, "alice", &mut out).unwrap();
        f.room.join(f.bob, "bob", &mut out).unwrap();
        let countdown_id = f.room.countdown_timer.as_ref().unwrap().id();

        f.room.disconnect(f.bob, &mut out);
        assert_eq!(f.room.phase(), RoomPhase::WaitingForPlayers);

        // A fire that slipped through before the cancel is ignored.
        let stale = TimerFire {
            room: RoomId::new("TEST"),
            kind: TimerKind::Countdown,
            id: countdown_id,
        };
        let mut late = Outbox::new();
        f.room.on_timer(&stale, &mut late);
        assert!(late.is_empty());
        assert_eq!(f.room.phase(), RoomPhase::WaitingForPlayers);

        // The seat is free again.
        let carol = ConnectionId::new();
        assert!(f.room.join(carol, "carol", &mut out).is_ok());
        assert_eq!(f.room.phase(), RoomPhase::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_unknown_connection() {
        let mut f = fixture(RoomConfig::default());
        let mut out = Outbox::new();
        assert!(!f.room.disconnect(f.alice, &mut out));
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_closes_room() {
        let mut f = fixture(RoomConfig::default());
        let mut out = Outbox::new();
        f.room.join(f.alice, "alice", &mut out).unwrap();

        let start = tokio::time::Instant::now();
        let fire = f.fires.recv().await.unwrap();
        assert_eq!(fire.kind, TimerKind::Inactivity);
        assert!(start.elapsed() >= Duration::from_secs(300));

        let mut close = Outbox::new();
        let outcome = f.room.on_timer(&fire, &mut close);
        assert_eq!(outcome, TimerOutcome::Closed(vec![f.alice]));
        assert_eq!(f.room.phase(), RoomPhase::Closed);
        assert_eq!(close.events_for(f.alice), vec![&ServerEvent::RoomIsClosed(true)]);
        assert!(f.room.players().is_empty());

        // Late fires and operations on a closed room do nothing.
        let mut after = Outbox::new();
        assert_eq!(f.room.on_timer(&fire, &mut after), TimerOutcome::Continue);
        assert_eq!(f.room.join(f.bob, "bob", &mut after), Err(RoomError::RoomNotFound));
        f.room.pop_witch(f.alice, 0, &mut after);
        assert!(after.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_inactivity_timer_is_ignored() {
        let mut f = fixture(RoomConfig::default());
        let old_id = f.room.inactivity_timer.as_ref().unwrap().id();

        let mut out = Outbox::new();
        f.room.join(f.alice, "alice", &mut out).unwrap();

        let stale = TimerFire {
            room: RoomId::new("TEST"),
            kind: TimerKind::Inactivity,
            id: old_id,
        };
        assert_eq!(f.room.on_timer(&stale, &mut out), TimerOutcome::Continue);
        assert_eq!(f.room.phase(), RoomPhase::WaitingForPlayers);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pops_rearm_inactivity_when_configured() {
        let config = RoomConfig {
            inactivity_policy: InactivityPolicy::AnyActivity,
            ..Default::default()
        };
        let mut f = started(config).await;
        let before = f.room.inactivity_timer.as_ref().unwrap().id();

        let mut out = Outbox::new();
        f.room.pop_witch(f.alice, 0, &mut out);
        assert_ne!(f.room.inactivity_timer.as_ref().unwrap().id(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pops_leave_inactivity_alone_by_default() {
        let mut f = started(RoomConfig::default()).await;
        let before = f.room.inactivity_timer.as_ref().unwrap().id();

        let mut out = Outbox::new();
        f.room.pop_witch(f.alice, 0, &mut out);
        assert_eq!(f.room.inactivity_timer.as_ref().unwrap().id(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alive_witches_are_issued_ids() {
        let mut f = started(RoomConfig::default()).await;
        for round in 0..30 {
            let target = f.room.alive_witches().next().unwrap();
            let popper = if round % 2 == 0 { f.alice } else { f.bob };
            let mut out = Outbox::new();
            f.room.pop_witch(popper, target, &mut out);
            assert!(f.room.alive_witches().all(|id| id < f.room.witch_serial()));
            assert!(f.room.alive_count() <= witch::target_population(f.room.witch_serial()));
        }
    }
}
