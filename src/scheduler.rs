//! Room Timers
//!
//! Timers never call into a room directly. When one expires it sends a
//! [`TimerFire`] naming the room and the timer back to the gateway, which
//! looks the room up again and lets it decide whether the fire still
//! applies. A room may have closed, or replaced the timer, in the meantime.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::room::RoomId;

/// Unique identity of one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Delay between the second player sitting down and the first witches.
    Countdown,
    /// Closes a room nobody has touched for a while.
    Inactivity,
}

/// Delivered to the event loop when a timer expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    /// Room that armed the timer.
    pub room: RoomId,
    /// Purpose of the timer.
    pub kind: TimerKind,
    /// Identity of the timer instance.
    pub id: TimerId,
}

/// Handle to an armed timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    id: TimerId,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    /// Identity carried by this timer's fires.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// True if `fire` came from this timer.
    pub fn matches(&self, fire: &TimerFire) -> bool {
        self.id == fire.id
    }

    /// Stop the timer. Fires already queued are filtered by [`Self::matches`].
    pub fn cancel(mut self) {
        self.abort_task();
    }

    fn abort_task(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Source of one-shot and repeating timers.
pub trait Scheduler: Send + Sync {
    /// Fire once after `delay`.
    fn once(&self, delay: Duration, room: RoomId, kind: TimerKind) -> TimerHandle;

    /// Fire every `period`, first after one full period.
    fn repeating(&self, period: Duration, room: RoomId, kind: TimerKind) -> TimerHandle;
}

/// Scheduler backed by Tokio tasks.
///
/// Must be used from within a Tokio runtime.
pub struct TokioScheduler {
    next_id: AtomicU64,
    fires: mpsc::UnboundedSender<TimerFire>,
}

/// Shortest period a repeating timer runs at; `interval_at` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

impl TokioScheduler {
    /// Create a scheduler delivering fires into `fires`.
    pub fn new(fires: mpsc::UnboundedSender<TimerFire>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            fires,
        }
    }

    fn allocate(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Scheduler for TokioScheduler {
    fn once(&self, delay: Duration, room: RoomId, kind: TimerKind) -> TimerHandle {
        let id = self.allocate();
        let fires = self.fires.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = fires.send(TimerFire { room, kind, id });
        });

        TimerHandle {
            id,
            abort: Some(task.abort_handle()),
        }
    }

    fn repeating(&self, period: Duration, room: RoomId, kind: TimerKind) -> TimerHandle {
        let period = period.max(MIN_PERIOD);
        let id = self.allocate();
        let fires = self.fires.clone();
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let fire = TimerFire {
                    room: room.clone(),
                    kind,
                    id,
                };
                if fires.send(fire).is_err() {
                    break;
                }
            }
        });

        TimerHandle {
            id,
            abort: Some(task.abort_handle()),
        }
    }
}
