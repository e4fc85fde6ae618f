//! Database schema migrations
//!
//! Versioned, forward-only migrations tracked in the `schema_version` table.
//! Each migration is idempotent so a partially applied upgrade can be re-run.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations**; add a new one for each schema change
//! 2. **Check before altering** (pragma_table_info / IF NOT EXISTS)
//! 3. **Prefer ALTER TABLE** over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Migration v1: election appearance statistics on track_stations
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    if !has_column(pool, "track_stations", "elec_appearances").await? {
        sqlx::query(
            "ALTER TABLE track_stations ADD COLUMN elec_appearances INTEGER NOT NULL DEFAULT 0",
        )
        .execute(pool)
        .await?;
        info!("Migration v1: Added elec_appearances to track_stations");
    }

    if !has_column(pool, "track_stations", "elec_last").await? {
        sqlx::query("ALTER TABLE track_stations ADD COLUMN elec_last INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
        info!("Migration v1: Added elec_last to track_stations");
    }

    Ok(())
}

/// Migration v2: lookup indexes for the request line and elections
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_requests_station ON requests (station_id, request_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_election_entries_elec ON election_entries (elec_id, entry_position)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_track_albums_album ON track_albums (album_id, station_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
