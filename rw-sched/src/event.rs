//! Event state machine
//!
//! Every scheduled item (election, one-up, jingle, live show) shares one
//! lifecycle stored in the `schedule` table:
//!
//! ```text
//! Scheduled ──start()──> InProgress ──finish()──> Finished
//! ```
//!
//! `Finished` is terminal and is what the `used` flag records. Only
//! elections carry fill/resolve behavior; the other kinds load as plain
//! lifecycle records.

use crate::election::Election;
use crate::error::{Error, Result};
use rw_common::time::now_secs;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// Kind of scheduled item, as stored in `schedule.sched_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Election,
    OneUp,
    Jingle,
    LiveShow,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Election => "election",
            EventKind::OneUp => "oneup",
            EventKind::Jingle => "jingle",
            EventKind::LiveShow => "liveshow",
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "election" => Ok(EventKind::Election),
            "oneup" => Ok(EventKind::OneUp),
            "jingle" => Ok(EventKind::Jingle),
            "liveshow" => Ok(EventKind::LiveShow),
            other => Err(Error::InvalidScheduleType(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state derived from the `used` / `in_progress` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Scheduled,
    InProgress,
    Finished,
}

/// Lifecycle record shared by every scheduled item
///
/// Timestamps are Unix seconds. `used` and `in_progress` are never both set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub kind: EventKind,
    pub station_id: i64,
    pub name: Option<String>,
    pub scheduled_start: i64,
    pub actual_start: Option<i64>,
    pub scheduled_end: i64,
    pub actual_end: Option<i64>,
    pub used: bool,
    pub in_progress: bool,
}

impl Event {
    /// Insert a new scheduled event using an open connection or transaction
    pub(crate) async fn insert(
        conn: &mut SqliteConnection,
        station_id: i64,
        kind: EventKind,
        name: Option<&str>,
        scheduled_start: i64,
        scheduled_end: i64,
    ) -> Result<Self> {
        let result = sqlx::query(
            r#"
            INSERT INTO schedule (station_id, sched_type, sched_name, sched_start, sched_end)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(station_id)
        .bind(kind.as_str())
        .bind(name)
        .bind(scheduled_start)
        .bind(scheduled_end)
        .execute(&mut *conn)
        .await?;

        Ok(Self {
            id: result.last_insert_rowid(),
            kind,
            station_id,
            name: name.map(str::to_string),
            scheduled_start,
            actual_start: None,
            scheduled_end,
            actual_end: None,
            used: false,
            in_progress: false,
        })
    }

    /// Schedule a new event
    pub async fn create(
        db: &SqlitePool,
        station_id: i64,
        kind: EventKind,
        name: Option<&str>,
        scheduled_start: i64,
        scheduled_end: i64,
    ) -> Result<Self> {
        let mut conn = db.acquire().await?;
        let event =
            Self::insert(&mut *conn, station_id, kind, name, scheduled_start, scheduled_end).await?;
        info!("Scheduled {} {} on station {}", kind, event.id, station_id);
        Ok(event)
    }

    /// Load an event by schedule id
    ///
    /// Fails with `InvalidScheduleId` on a miss and `InvalidScheduleType`
    /// when the stored kind is unknown.
    pub async fn load(db: &SqlitePool, sched_id: i64) -> Result<Self> {
        let row = sqlx::query(
            r#"
            SELECT sched_id, station_id, sched_type, sched_name, sched_start,
                   sched_start_actual, sched_end, sched_end_actual, sched_used, sched_in_progress
            FROM schedule
            WHERE sched_id = ?
            "#,
        )
        .bind(sched_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::InvalidScheduleId(sched_id.to_string()))?;

        Ok(Self {
            id: row.get("sched_id"),
            kind: row.get::<String, _>("sched_type").parse()?,
            station_id: row.get("station_id"),
            name: row.get("sched_name"),
            scheduled_start: row.get("sched_start"),
            actual_start: row.get("sched_start_actual"),
            scheduled_end: row.get("sched_end"),
            actual_end: row.get("sched_end_actual"),
            used: row.get("sched_used"),
            in_progress: row.get("sched_in_progress"),
        })
    }

    pub fn state(&self) -> EventState {
        if self.used {
            EventState::Finished
        } else if self.in_progress {
            EventState::InProgress
        } else {
            EventState::Scheduled
        }
    }

    /// Transition to `InProgress`, recording the actual start
    ///
    /// Returns `Ok(false)` without touching anything when already in
    /// progress, and fails with `EventAlreadyUsed` once finished.
    pub async fn start(&mut self, db: &SqlitePool) -> Result<bool> {
        match self.state() {
            EventState::Finished => return Err(Error::EventAlreadyUsed(self.id)),
            EventState::InProgress => return Ok(false),
            EventState::Scheduled => {}
        }

        let now = now_secs();
        sqlx::query(
            "UPDATE schedule SET sched_in_progress = 1, sched_start_actual = ? WHERE sched_id = ?",
        )
        .bind(now)
        .bind(self.id)
        .execute(db)
        .await?;

        self.in_progress = true;
        self.actual_start = Some(now);
        Ok(true)
    }

    /// Transition to `Finished` from any state, recording the actual end
    ///
    /// Not idempotent: a second call rewrites the end timestamp.
    pub async fn finish(&mut self, db: &SqlitePool) -> Result<()> {
        let now = now_secs();
        sqlx::query(
            r#"
            UPDATE schedule
            SET sched_used = 1, sched_in_progress = 0, sched_end_actual = ?
            WHERE sched_id = ?
            "#,
        )
        .bind(now)
        .bind(self.id)
        .execute(db)
        .await?;

        self.used = true;
        self.in_progress = false;
        self.actual_end = Some(now);
        Ok(())
    }

    /// Move the scheduled window
    pub async fn reschedule(&mut self, db: &SqlitePool, start: i64, end: i64) -> Result<()> {
        sqlx::query("UPDATE schedule SET sched_start = ?, sched_end = ? WHERE sched_id = ?")
            .bind(start)
            .bind(end)
            .bind(self.id)
            .execute(db)
            .await?;

        self.scheduled_start = start;
        self.scheduled_end = end;
        Ok(())
    }

    /// Seconds between the start (actual if known, else scheduled) and the
    /// scheduled end
    pub fn duration(&self) -> i64 {
        self.scheduled_end - self.actual_start.unwrap_or(self.scheduled_start)
    }
}

/// Any loaded scheduled item
#[derive(Debug, Clone)]
pub enum ScheduledEvent {
    Election(Election),
    /// One-up, jingle or live-show window: lifecycle only
    Plain(Event),
}

impl ScheduledEvent {
    pub fn event(&self) -> &Event {
        match self {
            ScheduledEvent::Election(election) => &election.event,
            ScheduledEvent::Plain(event) => event,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event().kind
    }

    /// Finish whichever item this is
    pub async fn finish(&mut self, db: &SqlitePool) -> Result<()> {
        match self {
            ScheduledEvent::Election(election) => election.finish(db).await,
            ScheduledEvent::Plain(event) => event.finish(db).await,
        }
    }
}

/// Load any scheduled item by id, dispatching on its stored kind
pub async fn load_by_id(db: &SqlitePool, sched_id: i64) -> Result<ScheduledEvent> {
    let event = Event::load(db, sched_id).await?;
    load_by_id_and_kind(db, event.id, event.kind).await
}

/// Load a scheduled item whose kind is already known
pub async fn load_by_id_and_kind(
    db: &SqlitePool,
    sched_id: i64,
    kind: EventKind,
) -> Result<ScheduledEvent> {
    match kind {
        EventKind::Election => Ok(ScheduledEvent::Election(
            Election::load_by_id(db, sched_id).await?,
        )),
        EventKind::OneUp | EventKind::Jingle | EventKind::LiveShow => {
            Ok(ScheduledEvent::Plain(Event::load(db, sched_id).await?))
        }
    }
}
