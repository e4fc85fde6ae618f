//! Catalog fixtures for unit tests

use rw_common::db::{init_memory_database, register_station};
use sqlx::SqlitePool;

pub const STATION: i64 = 1;

/// In-memory database with station 1 registered at default settings
pub async fn station_db() -> SqlitePool {
    let db = init_memory_database().await.unwrap();
    register_station(&db, STATION, "Game").await.unwrap();
    db
}

pub async fn add_track(db: &SqlitePool, track_id: i64, length: i64) {
    sqlx::query("INSERT OR IGNORE INTO tracks (track_id, title, length) VALUES (?, ?, ?)")
        .bind(track_id)
        .bind(format!("Track {}", track_id))
        .bind(length)
        .execute(db)
        .await
        .unwrap();
    sqlx::query("INSERT INTO track_stations (track_id, station_id) VALUES (?, ?)")
        .bind(track_id)
        .bind(STATION)
        .execute(db)
        .await
        .unwrap();
}

pub async fn add_album(db: &SqlitePool, album_id: i64, cool_time: Option<i64>, tracks: &[i64]) {
    sqlx::query("INSERT INTO albums (album_id, name, cool_time) VALUES (?, ?, ?)")
        .bind(album_id)
        .bind(format!("Album {}", album_id))
        .bind(cool_time)
        .execute(db)
        .await
        .unwrap();
    for track_id in tracks {
        sqlx::query("INSERT INTO track_albums (track_id, album_id, station_id) VALUES (?, ?, ?)")
            .bind(track_id)
            .bind(album_id)
            .bind(STATION)
            .execute(db)
            .await
            .unwrap();
    }
}

pub async fn add_group(
    db: &SqlitePool,
    group_id: i64,
    elec_block: Option<i64>,
    cool_time: Option<i64>,
    tracks: &[i64],
) {
    sqlx::query("INSERT INTO tag_groups (group_id, name, elec_block, cool_time) VALUES (?, ?, ?, ?)")
        .bind(group_id)
        .bind(format!("Group {}", group_id))
        .bind(elec_block)
        .bind(cool_time)
        .execute(db)
        .await
        .unwrap();
    for track_id in tracks {
        sqlx::query("INSERT INTO track_tag_groups (track_id, group_id) VALUES (?, ?)")
            .bind(track_id)
            .bind(group_id)
            .execute(db)
            .await
            .unwrap();
    }
}

pub async fn add_listener(db: &SqlitePool, user_id: i64, purge: bool) {
    sqlx::query("INSERT INTO listeners (user_id, station_id, username, purge) VALUES (?, ?, ?, ?)")
        .bind(user_id)
        .bind(STATION)
        .bind(format!("listener{}", user_id))
        .bind(purge)
        .execute(db)
        .await
        .unwrap();
}

pub async fn set_cool(db: &SqlitePool, track_id: i64, cool: bool, cool_end: i64) {
    sqlx::query("UPDATE track_stations SET cool = ?, cool_end = ? WHERE track_id = ? AND station_id = ?")
        .bind(cool)
        .bind(cool_end)
        .bind(track_id)
        .bind(STATION)
        .execute(db)
        .await
        .unwrap();
}

pub async fn set_blocked(db: &SqlitePool, track_id: i64, blocked: bool) {
    sqlx::query(
        "UPDATE track_stations SET elec_blocked = ?, elec_blocked_num = ? WHERE track_id = ? AND station_id = ?",
    )
    .bind(blocked)
    .bind(if blocked { 1 } else { 0 })
    .bind(track_id)
    .bind(STATION)
    .execute(db)
    .await
    .unwrap();
}

pub async fn set_request_only(db: &SqlitePool, track_id: i64) {
    sqlx::query("UPDATE track_stations SET request_only = 1 WHERE track_id = ? AND station_id = ?")
        .bind(track_id)
        .bind(STATION)
        .execute(db)
        .await
        .unwrap();
}

pub async fn set_played_last(db: &SqlitePool, track_id: i64, played_last: i64) {
    sqlx::query("UPDATE track_stations SET played_last = ? WHERE track_id = ? AND station_id = ?")
        .bind(played_last)
        .bind(track_id)
        .bind(STATION)
        .execute(db)
        .await
        .unwrap();
}
