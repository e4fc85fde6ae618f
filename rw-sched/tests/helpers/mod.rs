//! Shared fixtures for rw-sched integration tests

#![allow(dead_code)]

use rw_common::db::{init_database, register_station};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create an on-disk test database with the given stations registered
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db(stations: &[i64]) -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let db = init_database(&temp_dir.path().join("test_rainwave.db"))
        .await
        .unwrap();
    for &station_id in stations {
        register_station(&db, station_id, &format!("Test {}", station_id))
            .await
            .unwrap();
    }
    (temp_dir, db)
}

/// Add a track to the catalog and register it on a station
pub async fn add_track(db: &SqlitePool, station_id: i64, track_id: i64, length: i64) {
    sqlx::query("INSERT OR IGNORE INTO tracks (track_id, title, length) VALUES (?, ?, ?)")
        .bind(track_id)
        .bind(format!("Track {}", track_id))
        .bind(length)
        .execute(db)
        .await
        .unwrap();
    sqlx::query("INSERT INTO track_stations (track_id, station_id) VALUES (?, ?)")
        .bind(track_id)
        .bind(station_id)
        .execute(db)
        .await
        .unwrap();
}

pub async fn add_album(db: &SqlitePool, station_id: i64, album_id: i64, tracks: &[i64]) {
    sqlx::query("INSERT OR IGNORE INTO albums (album_id, name) VALUES (?, ?)")
        .bind(album_id)
        .bind(format!("Album {}", album_id))
        .execute(db)
        .await
        .unwrap();
    for track_id in tracks {
        sqlx::query("INSERT INTO track_albums (track_id, album_id, station_id) VALUES (?, ?, ?)")
            .bind(track_id)
            .bind(album_id)
            .bind(station_id)
            .execute(db)
            .await
            .unwrap();
    }
}

pub async fn add_listener(db: &SqlitePool, station_id: i64, user_id: i64) {
    sqlx::query("INSERT INTO listeners (user_id, station_id, username, purge) VALUES (?, ?, ?, 0)")
        .bind(user_id)
        .bind(station_id)
        .bind(format!("listener{}", user_id))
        .execute(db)
        .await
        .unwrap();
}
