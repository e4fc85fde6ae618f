//! Error types for rw-sched
//!
//! Lookup misses and lifecycle violations are surfaced to the caller as-is;
//! nothing in the scheduler retries. Persistence failures propagate to the
//! driver, which owns retry policy.

use thiserror::Error;

/// Main error type for the scheduling core
#[derive(Error, Debug)]
pub enum Error {
    /// No schedule row with this id
    #[error("Invalid schedule id: {0}")]
    InvalidScheduleId(String),

    /// No election with this id
    #[error("Invalid election id: {0}")]
    InvalidElectionId(i64),

    /// Stored event kind is not one the scheduler knows
    #[error("Invalid schedule type: {0}")]
    InvalidScheduleType(String),

    /// Attempted to start an event that already finished
    #[error("Event {0} has already been used")]
    EventAlreadyUsed(i64),

    /// Listener already has a vote recorded in this election
    #[error("User {user_id} already voted in election {elec_id}")]
    AlreadyVoted { user_id: i64, elec_id: i64 },

    /// Length requested for an election with no entries
    #[error("Election {0} has no entries")]
    EmptyElection(i64),

    /// The request line has nothing eligible; callers fall back to the cascade
    #[error("No request available for station {0}")]
    NoRequestAvailable(i64),

    /// Track is not registered on any station
    #[error("Track {0} has no stations")]
    SongHasNoStations(i64),

    /// Station has no registered tracks at all
    #[error("No available tracks for station {0}")]
    NoAvailableTracks(i64),

    /// Track is not registered for the station it was looked up on
    #[error("Track {track_id} not found on station {station_id}")]
    TrackNotFound { track_id: i64, station_id: i64 },

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Shared-library errors (settings, configuration)
    #[error(transparent)]
    Common(#[from] rw_common::Error),
}

/// Convenience Result type using rw-sched Error
pub type Result<T> = std::result::Result<T, Error>;
