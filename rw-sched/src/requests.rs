//! Request queue
//!
//! Per-station waiting line of listener requests. The autoincrement
//! `request_id` is the arrival order and defines FIFO priority. Validity is
//! derived at read time from the listener's purge state and the track's
//! cooldown and election-block flags.

use crate::catalog::ACTIVE_REQUESTS;
use crate::error::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// A listener credited with a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requester {
    pub user_id: i64,
    pub username: String,
}

/// One row of the request line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    /// Arrival order
    pub request_id: i64,
    pub station_id: i64,
    pub track_id: i64,
    pub requester: Requester,
}

/// Add a request to the end of a station's line
pub async fn submit(
    db: &SqlitePool,
    station_id: i64,
    user_id: i64,
    track_id: i64,
    now: i64,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO requests (user_id, station_id, track_id, wait_start) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(station_id)
    .bind(track_id)
    .bind(now)
    .execute(db)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Remove a request from the line once it has been fulfilled
pub async fn remove(db: &SqlitePool, request_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM requests WHERE request_id = ?")
        .bind(request_id)
        .execute(db)
        .await?;

    Ok(())
}

/// Earliest-arrived request that can be played right now
///
/// The listener must not be purged and the track must be neither cooling
/// down nor election-blocked. Fails with `NoRequestAvailable` otherwise.
pub async fn earliest_valid(db: &SqlitePool, station_id: i64) -> Result<Request> {
    let sql = format!(
        r#"
        SELECT r.request_id, r.track_id, r.user_id, r.username
        FROM {}
        JOIN track_stations ts ON ts.track_id = r.track_id AND ts.station_id = r.station_id
        WHERE r.station_id = ? AND ts.track_exists = 1 AND ts.cool = 0 AND ts.elec_blocked = 0
        ORDER BY r.request_id
        LIMIT 1
        "#,
        ACTIVE_REQUESTS
    );

    let row = sqlx::query(&sql)
        .bind(station_id)
        .fetch_optional(db)
        .await?
        .ok_or(Error::NoRequestAvailable(station_id))?;

    Ok(Request {
        request_id: row.get("request_id"),
        station_id,
        track_id: row.get("track_id"),
        requester: Requester {
            user_id: row.get("user_id"),
            username: row.get("username"),
        },
    })
}

/// Number of requests waiting in a station's line
pub async fn length(db: &SqlitePool, station_id: i64) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM requests WHERE station_id = ?")
            .bind(station_id)
            .fetch_one(db)
            .await?,
    )
}

/// Whether a listener already has a vote recorded in an election
pub async fn has_prior_vote_credit(db: &SqlitePool, user_id: i64, elec_id: i64) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM vote_history WHERE user_id = ? AND elec_id = ?")
            .bind(user_id)
            .bind(elec_id)
            .fetch_one(db)
            .await?;

    Ok(count > 0)
}

/// Earliest active requester of another track sharing an album with this one
pub async fn album_requester(
    db: &SqlitePool,
    track_id: i64,
    station_id: i64,
) -> Result<Option<Requester>> {
    let sql = format!(
        r#"
        SELECT r.user_id, r.username
        FROM track_albums ta
        JOIN track_albums rta ON rta.album_id = ta.album_id AND rta.station_id = ta.station_id
        JOIN {} ON r.track_id = rta.track_id AND r.station_id = ta.station_id
        WHERE ta.track_id = ? AND ta.station_id = ? AND r.track_id != ta.track_id
        ORDER BY r.request_id
        LIMIT 1
        "#,
        ACTIVE_REQUESTS
    );

    let row = sqlx::query(&sql)
        .bind(track_id)
        .bind(station_id)
        .fetch_optional(db)
        .await?;

    Ok(row.map(|row| Requester {
        user_id: row.get("user_id"),
        username: row.get("username"),
    }))
}

/// Earliest active requester of exactly this track
pub async fn track_requester(
    db: &SqlitePool,
    track_id: i64,
    station_id: i64,
) -> Result<Option<Requester>> {
    let sql = format!(
        r#"
        SELECT r.user_id, r.username
        FROM {}
        WHERE r.station_id = ? AND r.track_id = ?
        ORDER BY r.request_id
        LIMIT 1
        "#,
        ACTIVE_REQUESTS
    );

    let row = sqlx::query(&sql)
        .bind(station_id)
        .bind(track_id)
        .fetch_optional(db)
        .await?;

    if let Some(row) = &row {
        debug!(
            "Track {} on station {} is requested by user {}",
            track_id,
            station_id,
            row.get::<i64, _>("user_id")
        );
    }

    Ok(row.map(|row| Requester {
        user_id: row.get("user_id"),
        username: row.get("username"),
    }))
}
