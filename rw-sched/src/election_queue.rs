//! Staged tracks that jump the cascade
//!
//! Operators stage tracks per station; the next fill drains them in
//! staging order before the request line or the cascade is consulted.

use crate::error::Result;
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// Stage a track for the next election on a station
pub async fn stage(db: &SqlitePool, station_id: i64, track_id: i64) -> Result<i64> {
    let result = sqlx::query("INSERT INTO election_queue (station_id, track_id) VALUES (?, ?)")
        .bind(station_id)
        .bind(track_id)
        .execute(db)
        .await?;

    let id = result.last_insert_rowid();
    debug!("Staged track {} on station {} (queue id {})", track_id, station_id, id);
    Ok(id)
}

/// Remove and return up to `limit` staged tracks, oldest first
pub async fn dequeue(db: &SqlitePool, station_id: i64, limit: usize) -> Result<Vec<i64>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut tx = db.begin().await?;

    let rows = sqlx::query(
        "SELECT elecq_id, track_id FROM election_queue WHERE station_id = ? ORDER BY elecq_id LIMIT ?",
    )
    .bind(station_id)
    .bind(limit as i64)
    .fetch_all(&mut *tx)
    .await?;

    let mut track_ids = Vec::with_capacity(rows.len());
    for row in rows {
        let elecq_id: i64 = row.get("elecq_id");
        sqlx::query("DELETE FROM election_queue WHERE elecq_id = ?")
            .bind(elecq_id)
            .execute(&mut *tx)
            .await?;
        track_ids.push(row.get("track_id"));
    }

    tx.commit().await?;
    Ok(track_ids)
}

/// Number of staged tracks on a station
pub async fn length(db: &SqlitePool, station_id: i64) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM election_queue WHERE station_id = ?")
            .bind(station_id)
            .fetch_one(db)
            .await?,
    )
}
