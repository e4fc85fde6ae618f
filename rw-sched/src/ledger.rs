//! Cooldown & election-block ledger
//!
//! Sole mutator of the per-station eligibility flags on `track_stations`.
//! Elections read these flags through the catalog and request changes
//! through the functions here.

use crate::catalog::Track;
use crate::error::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// Why a track is currently election-blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ElecBlockedBy {
    None,
    /// Appeared in an election
    InElection,
    /// Waiting for its cooldown to start
    CooldownPending,
    /// A tag group sibling appeared in an election
    Group,
}

impl ElecBlockedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElecBlockedBy::None => "none",
            ElecBlockedBy::InElection => "in_election",
            ElecBlockedBy::CooldownPending => "cooldown_pending",
            ElecBlockedBy::Group => "group",
        }
    }

    /// Parse the stored value; unknown values read as `None`
    pub fn from_db(s: &str) -> Self {
        match s {
            "in_election" => ElecBlockedBy::InElection,
            "cooldown_pending" => ElecBlockedBy::CooldownPending,
            "group" => ElecBlockedBy::Group,
            _ => ElecBlockedBy::None,
        }
    }
}

impl std::fmt::Display for ElecBlockedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-station eligibility flags of one track
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackFlags {
    pub cool: bool,
    /// Unix seconds when the cooldown may be lifted
    pub cool_end: i64,
    pub elec_blocked: bool,
    pub elec_blocked_by: ElecBlockedBy,
    /// Elections remaining before the block lifts
    pub elec_blocked_num: i64,
    pub request_only: bool,
}

/// Read the eligibility flags of a track on a station
pub async fn read_flags(db: &SqlitePool, track_id: i64, station_id: i64) -> Result<TrackFlags> {
    let row = sqlx::query(
        r#"
        SELECT cool, cool_end, elec_blocked, elec_blocked_by, elec_blocked_num, request_only
        FROM track_stations
        WHERE track_id = ? AND station_id = ?
        "#,
    )
    .bind(track_id)
    .bind(station_id)
    .fetch_optional(db)
    .await?
    .ok_or(Error::TrackNotFound {
        track_id,
        station_id,
    })?;

    Ok(TrackFlags {
        cool: row.get("cool"),
        cool_end: row.get("cool_end"),
        elec_blocked: row.get("elec_blocked"),
        elec_blocked_by: ElecBlockedBy::from_db(&row.get::<String, _>("elec_blocked_by")),
        elec_blocked_num: row.get("elec_blocked_num"),
        request_only: row.get("request_only"),
    })
}

/// Block a track from elections for `block_length` elections
///
/// Only ever raises the remaining count: a track already blocked for longer
/// keeps its longer block. Returns whether the row changed.
pub async fn set_election_block(
    db: &SqlitePool,
    track_id: i64,
    station_id: i64,
    blocked_by: ElecBlockedBy,
    block_length: i64,
) -> Result<bool> {
    if block_length <= 0 {
        return Ok(false);
    }

    let result = sqlx::query(
        r#"
        UPDATE track_stations
        SET elec_blocked = 1, elec_blocked_by = ?, elec_blocked_num = ?
        WHERE track_id = ? AND station_id = ? AND elec_blocked_num < ?
        "#,
    )
    .bind(blocked_by.as_str())
    .bind(block_length)
    .bind(track_id)
    .bind(station_id)
    .bind(block_length)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Block every other track sharing a tag group that carries a block policy
pub async fn start_group_blocks(db: &SqlitePool, track: &Track) -> Result<u64> {
    let mut blocked = 0;

    for group in &track.groups {
        let Some(block_length) = group.elec_block.filter(|n| *n > 0) else {
            continue;
        };

        let result = sqlx::query(
            r#"
            UPDATE track_stations
            SET elec_blocked = 1, elec_blocked_by = ?, elec_blocked_num = ?
            WHERE station_id = ? AND track_id != ? AND elec_blocked_num < ?
              AND track_id IN (SELECT track_id FROM track_tag_groups WHERE group_id = ?)
            "#,
        )
        .bind(ElecBlockedBy::Group.as_str())
        .bind(block_length)
        .bind(track.station_id)
        .bind(track.track_id)
        .bind(block_length)
        .bind(group.group_id)
        .execute(db)
        .await?;

        blocked += result.rows_affected();
    }

    Ok(blocked)
}

/// Count down every election block on a station by one election
///
/// Blocks reaching zero are lifted. Returns the number of tracks unblocked.
pub async fn tick_election_blocks(db: &SqlitePool, station_id: i64) -> Result<u64> {
    let mut tx = db.begin().await?;

    sqlx::query(
        "UPDATE track_stations SET elec_blocked_num = elec_blocked_num - 1 \
         WHERE station_id = ? AND elec_blocked_num > 0",
    )
    .bind(station_id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(
        "UPDATE track_stations SET elec_blocked = 0, elec_blocked_by = 'none', elec_blocked_num = 0 \
         WHERE station_id = ? AND elec_blocked = 1 AND elec_blocked_num <= 0",
    )
    .bind(station_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(result.rows_affected())
}

/// Lift cooldowns that ended before `now`
pub async fn clear_expired_cooldowns(db: &SqlitePool, station_id: i64, now: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE track_stations SET cool = 0 WHERE station_id = ? AND cool = 1 AND cool_end < ?",
    )
    .bind(station_id)
    .bind(now)
    .execute(db)
    .await?;

    if result.rows_affected() > 0 {
        debug!(
            "Station {}: lifted {} expired cooldowns",
            station_id,
            result.rows_affected()
        );
    }

    Ok(result.rows_affected())
}

/// Put a track that just played into cooldown
///
/// The track cools for `default_seconds`. Albums and tag groups carrying
/// their own `cool_time` additionally cool every member track on the
/// station. Cooldowns are only ever extended.
pub async fn start_cooldown(
    db: &SqlitePool,
    track: &Track,
    now: i64,
    default_seconds: i64,
) -> Result<()> {
    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        UPDATE track_stations
        SET cool = 1, cool_end = MAX(cool_end, ?)
        WHERE track_id = ? AND station_id = ?
        "#,
    )
    .bind(now + default_seconds.max(0))
    .bind(track.track_id)
    .bind(track.station_id)
    .execute(&mut *tx)
    .await?;

    for album in &track.albums {
        let Some(cool_time) = album.cool_time.filter(|t| *t > 0) else {
            continue;
        };
        sqlx::query(
            r#"
            UPDATE track_stations
            SET cool = 1, cool_end = MAX(cool_end, ?)
            WHERE station_id = ?
              AND track_id IN (SELECT track_id FROM track_albums WHERE album_id = ? AND station_id = ?)
            "#,
        )
        .bind(now + cool_time)
        .bind(track.station_id)
        .bind(album.album_id)
        .bind(track.station_id)
        .execute(&mut *tx)
        .await?;
    }

    for group in &track.groups {
        let Some(cool_time) = group.cool_time.filter(|t| *t > 0) else {
            continue;
        };
        sqlx::query(
            r#"
            UPDATE track_stations
            SET cool = 1, cool_end = MAX(cool_end, ?)
            WHERE station_id = ?
              AND track_id IN (SELECT track_id FROM track_tag_groups WHERE group_id = ?)
            "#,
        )
        .bind(now + cool_time)
        .bind(track.station_id)
        .bind(group.group_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Record that a track went to air
pub async fn mark_played(db: &SqlitePool, track_id: i64, station_id: i64, now: i64) -> Result<()> {
    sqlx::query("UPDATE track_stations SET played_last = ? WHERE track_id = ? AND station_id = ?")
        .bind(now)
        .bind(track_id)
        .bind(station_id)
        .execute(db)
        .await?;

    Ok(())
}

/// Record that a track was placed into an election
pub async fn mark_election_appearance(
    db: &SqlitePool,
    track_id: i64,
    station_id: i64,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE track_stations
        SET elec_appearances = elec_appearances + 1, elec_last = ?
        WHERE track_id = ? AND station_id = ?
        "#,
    )
    .bind(now)
    .bind(track_id)
    .bind(station_id)
    .execute(db)
    .await?;

    Ok(())
}

/// Remove every cooldown and election block on a station
pub async fn remove_all_locks(db: &SqlitePool, station_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE track_stations
        SET elec_blocked = 0, elec_blocked_by = 'none', elec_blocked_num = 0,
            cool = 0, cool_end = 0
        WHERE station_id = ?
        "#,
    )
    .bind(station_id)
    .execute(db)
    .await?;

    Ok(())
}
