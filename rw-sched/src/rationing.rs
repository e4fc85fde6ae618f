//! Request rationing sequencer
//!
//! Decides when listener requests are injected into elections. Idle
//! stretches of `interval` elections alternate with bursts of `sequence`
//! requests, where the burst size grows with the length of the request line.
//!
//! The state is an explicit per-station value owned by the station's driver
//! and persisted in `station_vars`, so a restarted process resumes the same
//! rhythm.

use crate::error::Result;
use rw_common::db::{get_station_var, set_station_var, StationSettings};
use sqlx::SqlitePool;
use tracing::debug;

const REQUEST_INTERVAL_VAR: &str = "request_interval";
const REQUEST_SEQUENCE_VAR: &str = "request_sequence";

/// Per-station rationing counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RationingState {
    /// Elections left to skip before the next burst
    pub interval: i64,
    /// Requests left to inject in the current burst
    pub sequence: i64,
}

impl RationingState {
    pub fn new(interval: i64, sequence: i64) -> Self {
        Self { interval, sequence }
    }

    /// Hydrate from the persisted counters, defaulting to 0/0
    pub async fn load(db: &SqlitePool, station_id: i64) -> Result<Self> {
        let interval = get_station_var(db, station_id, REQUEST_INTERVAL_VAR)
            .await?
            .unwrap_or(0);
        let sequence = get_station_var(db, station_id, REQUEST_SEQUENCE_VAR)
            .await?
            .unwrap_or(0);

        Ok(Self { interval, sequence })
    }

    /// Persist the counters; the last saved values win after a restart
    pub async fn save(&self, db: &SqlitePool, station_id: i64) -> Result<()> {
        set_station_var(db, station_id, REQUEST_INTERVAL_VAR, self.interval).await?;
        set_station_var(db, station_id, REQUEST_SEQUENCE_VAR, self.sequence).await?;
        Ok(())
    }

    /// Whether the next call to `is_request_due` opens a new burst
    ///
    /// Only then is the request line length consulted.
    pub fn starts_new_burst(&self) -> bool {
        self.interval <= 0 && self.sequence <= 0
    }

    /// Signal whether the election being filled should take a request
    ///
    /// Does not decrement `sequence` when inside a burst: the caller calls
    /// [`RationingState::consume`] once a request is actually placed.
    pub fn is_request_due(&mut self, queue_length: i64, settings: &StationSettings) -> bool {
        if self.starts_new_burst() {
            let scale = settings.request_interval_scale.max(1);
            self.sequence = 1 + queue_length.max(0) / scale;
            self.interval = settings.request_interval_gap;
            debug!(
                "Request burst of {} started (line length {}, gap {})",
                self.sequence, queue_length, self.interval
            );
            true
        } else if self.sequence > 0 {
            true
        } else {
            self.interval -= 1;
            false
        }
    }

    /// Account for one request placed into an election
    pub fn consume(&mut self) {
        if self.sequence > 0 {
            self.sequence -= 1;
        }
    }
}
