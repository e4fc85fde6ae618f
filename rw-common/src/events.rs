//! Scheduler event types and EventBus
//!
//! Events are broadcast at every election lifecycle transition so that other
//! components (API push, statistics) can follow the schedule without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Scheduler event types
///
/// Serialized with an internal `type` tag for transmission to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScheduleEvent {
    /// An empty election was created for a station
    ElectionCreated {
        station_id: i64,
        elec_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An election finished filling
    ElectionFilled {
        station_id: i64,
        elec_id: i64,
        /// Track ids in position order
        track_ids: Vec<i64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Voting closed and a winner was chosen
    ElectionStarted {
        station_id: i64,
        elec_id: i64,
        winner_track_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An election was closed out
    ElectionFinished {
        station_id: i64,
        elec_id: i64,
        /// Track that went to air, if the election ever started
        winner_track_id: Option<i64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A listener request was placed into an election
    RequestInserted {
        station_id: i64,
        elec_id: i64,
        track_id: i64,
        user_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Expired cooldowns were lifted
    CooldownsCleared {
        station_id: i64,
        /// Number of tracks made available again
        count: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling the scheduler.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScheduleEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScheduleEvent,
    ) -> Result<usize, broadcast::error::SendError<ScheduleEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ScheduleEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
