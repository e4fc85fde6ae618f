//! Database initialization
//!
//! Creates the database on first run, enables foreign keys and WAL, creates the
//! scheduling schema and runs pending migrations. Every step is idempotent.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// A single connection that never expires keeps the database alive for the
/// lifetime of the pool.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all scheduling tables and apply migrations
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_schema_version_table(pool).await?;
    create_station_tables(pool).await?;
    create_catalog_tables(pool).await?;
    create_listener_tables(pool).await?;
    create_schedule_tables(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_station_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stations (
            station_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Configuration provider: read on every call, mutable externally
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS station_settings (
            station_id INTEGER NOT NULL,
            key TEXT NOT NULL,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (station_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Process state that must survive restarts (rationing counters)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS station_vars (
            station_id INTEGER NOT NULL,
            key TEXT NOT NULL,
            value TEXT,
            PRIMARY KEY (station_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_catalog_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            track_id INTEGER PRIMARY KEY,
            title TEXT,
            filename TEXT NOT NULL DEFAULT '',
            length INTEGER NOT NULL,
            added_on INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_stations (
            track_id INTEGER NOT NULL REFERENCES tracks(track_id) ON DELETE CASCADE,
            station_id INTEGER NOT NULL,
            track_exists INTEGER NOT NULL DEFAULT 1,
            cool INTEGER NOT NULL DEFAULT 0,
            cool_end INTEGER NOT NULL DEFAULT 0,
            elec_blocked INTEGER NOT NULL DEFAULT 0,
            elec_blocked_by TEXT NOT NULL DEFAULT 'none',
            elec_blocked_num INTEGER NOT NULL DEFAULT 0,
            request_only INTEGER NOT NULL DEFAULT 0,
            played_last INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (track_id, station_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS albums (
            album_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            cool_time INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_albums (
            track_id INTEGER NOT NULL REFERENCES tracks(track_id) ON DELETE CASCADE,
            album_id INTEGER NOT NULL REFERENCES albums(album_id) ON DELETE CASCADE,
            station_id INTEGER NOT NULL,
            PRIMARY KEY (track_id, album_id, station_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artists (
            artist_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_artists (
            track_id INTEGER NOT NULL REFERENCES tracks(track_id) ON DELETE CASCADE,
            artist_id INTEGER NOT NULL REFERENCES artists(artist_id) ON DELETE CASCADE,
            PRIMARY KEY (track_id, artist_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tag_groups (
            group_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            elec_block INTEGER,
            cool_time INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_tag_groups (
            track_id INTEGER NOT NULL REFERENCES tracks(track_id) ON DELETE CASCADE,
            group_id INTEGER NOT NULL REFERENCES tag_groups(group_id) ON DELETE CASCADE,
            PRIMARY KEY (track_id, group_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_listener_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listeners (
            user_id INTEGER NOT NULL,
            station_id INTEGER NOT NULL,
            username TEXT NOT NULL,
            purge INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, station_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // request_id doubles as arrival order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            request_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            station_id INTEGER NOT NULL,
            track_id INTEGER NOT NULL REFERENCES tracks(track_id) ON DELETE CASCADE,
            wait_start INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_schedule_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedule (
            sched_id INTEGER PRIMARY KEY AUTOINCREMENT,
            station_id INTEGER NOT NULL,
            sched_type TEXT NOT NULL,
            sched_name TEXT,
            sched_start INTEGER NOT NULL DEFAULT 0,
            sched_start_actual INTEGER,
            sched_end INTEGER NOT NULL DEFAULT 0,
            sched_end_actual INTEGER,
            sched_used INTEGER NOT NULL DEFAULT 0,
            sched_in_progress INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS elections (
            elec_id INTEGER PRIMARY KEY REFERENCES schedule(sched_id) ON DELETE CASCADE,
            station_id INTEGER NOT NULL,
            elec_type TEXT NOT NULL DEFAULT 'normal'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS election_entries (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            elec_id INTEGER NOT NULL REFERENCES elections(elec_id) ON DELETE CASCADE,
            track_id INTEGER NOT NULL REFERENCES tracks(track_id),
            entry_position INTEGER NOT NULL,
            entry_type TEXT NOT NULL DEFAULT 'normal',
            elec_votes INTEGER NOT NULL DEFAULT 0,
            request_user_id INTEGER,
            request_username TEXT,
            UNIQUE (elec_id, track_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS election_queue (
            elecq_id INTEGER PRIMARY KEY AUTOINCREMENT,
            station_id INTEGER NOT NULL,
            track_id INTEGER NOT NULL REFERENCES tracks(track_id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vote_history (
            vote_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            elec_id INTEGER NOT NULL,
            entry_id INTEGER,
            track_id INTEGER NOT NULL,
            voted_at INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
