//! Station settings database access
//!
//! Per-station key-value configuration (`station_settings`) and persisted
//! per-station process state (`station_vars`). Settings are read on every
//! call so external edits take effect at the next scheduling step.

use crate::{Error, Result};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Candidate tracks per election
pub const SONGS_IN_ELECTION: &str = "songs_in_election";
/// Number of elections a track stays blocked after appearing in one
pub const ELEC_BLOCK_LENGTH: &str = "elec_block_length";
/// Queue length per extra request in a burst
pub const REQUEST_INTERVAL_SCALE: &str = "request_interval_scale";
/// Elections skipped between request bursts
pub const REQUEST_INTERVAL_GAP: &str = "request_interval_gap";
/// Half-width of the timed selection window, in seconds
pub const TARGET_DELTA: &str = "target_delta";
/// Cooldown applied when no album or group policy exists, in seconds
pub const COOLDOWN_SECONDS: &str = "cooldown_seconds";

const DEFAULTS: &[(&str, &str)] = &[
    (SONGS_IN_ELECTION, "3"),
    (ELEC_BLOCK_LENGTH, "2"),
    (REQUEST_INTERVAL_SCALE, "5"),
    (REQUEST_INTERVAL_GAP, "2"),
    (TARGET_DELTA, "30"),
    (COOLDOWN_SECONDS, "3600"),
];

/// Snapshot of one station's scheduling configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSettings {
    pub songs_in_election: i64,
    pub elec_block_length: i64,
    pub request_interval_scale: i64,
    pub request_interval_gap: i64,
    pub target_delta: i64,
    pub cooldown_seconds: i64,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            songs_in_election: 3,
            elec_block_length: 2,
            request_interval_scale: 5,
            request_interval_gap: 2,
            target_delta: 30,
            cooldown_seconds: 3600,
        }
    }
}

impl StationSettings {
    /// Read the current settings for a station, filling gaps with defaults
    pub async fn load(db: &SqlitePool, station_id: i64) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            songs_in_election: get_station_setting(db, station_id, SONGS_IN_ELECTION)
                .await?
                .unwrap_or(defaults.songs_in_election)
                .max(0),
            elec_block_length: get_station_setting(db, station_id, ELEC_BLOCK_LENGTH)
                .await?
                .unwrap_or(defaults.elec_block_length)
                .max(0),
            // Scale is a divisor
            request_interval_scale: get_station_setting(db, station_id, REQUEST_INTERVAL_SCALE)
                .await?
                .unwrap_or(defaults.request_interval_scale)
                .max(1),
            request_interval_gap: get_station_setting(db, station_id, REQUEST_INTERVAL_GAP)
                .await?
                .unwrap_or(defaults.request_interval_gap)
                .max(0),
            target_delta: get_station_setting(db, station_id, TARGET_DELTA)
                .await?
                .unwrap_or(defaults.target_delta)
                .max(0),
            cooldown_seconds: get_station_setting(db, station_id, COOLDOWN_SECONDS)
                .await?
                .unwrap_or(defaults.cooldown_seconds)
                .max(0),
        })
    }
}

/// Register a station and make sure every setting has a value
///
/// Existing values are preserved; NULL values are reset to defaults.
pub async fn register_station(db: &SqlitePool, station_id: i64, name: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO stations (station_id, name)
        VALUES (?, ?)
        ON CONFLICT(station_id) DO UPDATE SET name = excluded.name
        "#,
    )
    .bind(station_id)
    .bind(name)
    .execute(db)
    .await?;

    for (key, value) in DEFAULTS {
        ensure_station_setting(db, station_id, key, value).await?;
    }

    info!("Registered station {} ({})", station_id, name);
    Ok(())
}

async fn ensure_station_setting(
    db: &SqlitePool,
    station_id: i64,
    key: &str,
    default: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO station_settings (station_id, key, value)
        VALUES (?, ?, ?)
        ON CONFLICT(station_id, key) DO UPDATE SET value = excluded.value
        WHERE station_settings.value IS NULL
        "#,
    )
    .bind(station_id)
    .bind(key)
    .bind(default)
    .execute(db)
    .await?;

    Ok(())
}

/// Generic station setting getter
///
/// Returns None if the key doesn't exist for the station.
pub async fn get_station_setting<T: FromStr>(
    db: &SqlitePool,
    station_id: i64,
    key: &str,
) -> Result<Option<T>> {
    let value: Option<Option<String>> = sqlx::query_scalar(
        "SELECT value FROM station_settings WHERE station_id = ? AND key = ?",
    )
    .bind(station_id)
    .bind(key)
    .fetch_optional(db)
    .await?;

    parse_value(key, value.flatten())
}

/// Generic station setting setter
pub async fn set_station_setting<T: ToString>(
    db: &SqlitePool,
    station_id: i64,
    key: &str,
    value: T,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO station_settings (station_id, key, value, updated_at)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(station_id, key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(station_id)
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Read a persisted station variable
pub async fn get_station_var<T: FromStr>(
    db: &SqlitePool,
    station_id: i64,
    key: &str,
) -> Result<Option<T>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM station_vars WHERE station_id = ? AND key = ?")
            .bind(station_id)
            .bind(key)
            .fetch_optional(db)
            .await?;

    parse_value(key, value.flatten())
}

/// Persist a station variable
pub async fn set_station_var<T: ToString>(
    db: &SqlitePool,
    station_id: i64,
    key: &str,
    value: T,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO station_vars (station_id, key, value)
        VALUES (?, ?, ?)
        ON CONFLICT(station_id, key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(station_id)
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

fn parse_value<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    match value {
        Some(s) => match s.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}
