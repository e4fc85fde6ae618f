//! Track catalog gateway
//!
//! Read-only queries over the catalog: track records with their per-station
//! flags, album/artist/group membership, and the candidate queries used by
//! the selection cascade. Catalog maintenance lives elsewhere.

use crate::error::{Error, Result};
use crate::ledger::{ElecBlockedBy, TrackFlags};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

/// Requests from listeners still in the station and not purged
///
/// Aliased `r`, exposing `request_id`, `user_id`, `station_id`, `track_id`
/// and the listener's `username`.
pub(crate) const ACTIVE_REQUESTS: &str = "(\
    SELECT rq.request_id, rq.user_id, rq.station_id, rq.track_id, l.username \
    FROM requests rq \
    JOIN listeners l ON l.user_id = rq.user_id AND l.station_id = rq.station_id AND l.purge = 0\
    ) r";

/// Album membership, with the album's cooldown policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumRef {
    pub album_id: i64,
    pub name: String,
    /// Cooldown in seconds, when the album overrides the station default
    pub cool_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtistRef {
    pub artist_id: i64,
    pub name: String,
}

/// Tag group membership, with the group's block and cooldown policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRef {
    pub group_id: i64,
    pub name: String,
    /// Elections to block every track in the group once one appears
    pub elec_block: Option<i64>,
    pub cool_time: Option<i64>,
}

/// A track as seen from one station
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub track_id: i64,
    pub station_id: i64,
    pub title: Option<String>,
    /// Length in seconds
    pub length: i64,
    pub flags: TrackFlags,
    pub played_last: i64,
    pub albums: Vec<AlbumRef>,
    pub artists: Vec<ArtistRef>,
    pub groups: Vec<GroupRef>,
}

/// Exclusions applied by a candidate query
///
/// Each cascade tier is one of the constructors below, from strictest to
/// most permissive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CandidateFilter {
    pub exclude_cooling: bool,
    pub exclude_blocked: bool,
    pub exclude_album_requested: bool,
    pub exclude_request_only: bool,
    /// Inclusive length bounds in seconds
    pub length_window: Option<(i64, i64)>,
    /// Tracks never to return, such as those already on a ballot
    pub exclude_tracks: Vec<i64>,
}

impl CandidateFilter {
    /// Every exclusion, restricted to `[target - delta, target + delta]`
    pub fn timed(target: i64, delta: i64) -> Self {
        Self {
            length_window: Some((target - delta, target + delta)),
            ..Self::constrained()
        }
    }

    /// Every exclusion, any length
    pub fn constrained() -> Self {
        Self {
            exclude_cooling: true,
            exclude_blocked: true,
            exclude_album_requested: true,
            exclude_request_only: true,
            ..Self::default()
        }
    }

    /// Cooldown and election-block exclusions only
    pub fn available() -> Self {
        Self {
            exclude_cooling: true,
            exclude_blocked: true,
            ..Self::default()
        }
    }

    pub fn excluding(mut self, track_ids: &[i64]) -> Self {
        self.exclude_tracks = track_ids.to_vec();
        self
    }

    /// WHERE clause over `track_stations ts JOIN tracks t`
    ///
    /// Binds, in order: station id, the length window bounds if set, then
    /// each excluded track id.
    fn where_clause(&self) -> String {
        let mut clause = String::from("WHERE ts.station_id = ? AND ts.track_exists = 1");
        if self.exclude_cooling {
            clause.push_str(" AND ts.cool = 0");
        }
        if self.exclude_blocked {
            clause.push_str(" AND ts.elec_blocked = 0");
        }
        if self.exclude_request_only {
            clause.push_str(" AND ts.request_only = 0");
        }
        if self.exclude_album_requested {
            clause.push_str(&format!(
                " AND NOT EXISTS (\
                    SELECT 1 FROM track_albums ta \
                    JOIN track_albums rta ON rta.album_id = ta.album_id AND rta.station_id = ta.station_id \
                    JOIN {} ON r.track_id = rta.track_id AND r.station_id = ta.station_id \
                    WHERE ta.track_id = ts.track_id AND ta.station_id = ts.station_id)",
                ACTIVE_REQUESTS
            ));
        }
        if self.length_window.is_some() {
            clause.push_str(" AND t.length >= ? AND t.length <= ?");
        }
        if !self.exclude_tracks.is_empty() {
            clause.push_str(&format!(
                " AND ts.track_id NOT IN ({})",
                placeholders(self.exclude_tracks.len())
            ));
        }
        clause
    }
}

/// `?, ?, ...` for an IN list
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Count tracks on a station matching the filter
pub async fn candidate_count(
    db: &SqlitePool,
    station_id: i64,
    filter: &CandidateFilter,
) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM track_stations ts JOIN tracks t ON t.track_id = ts.track_id {}",
        filter.where_clause()
    );

    let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(station_id);
    if let Some((min, max)) = filter.length_window {
        query = query.bind(min).bind(max);
    }
    for track_id in &filter.exclude_tracks {
        query = query.bind(*track_id);
    }

    Ok(query.fetch_one(db).await?)
}

/// Fetch the track at `offset` within the filter's candidate set
///
/// Candidates are ordered by track id so a count followed by an offset
/// fetch addresses a stable sequence.
pub async fn candidate_at_offset(
    db: &SqlitePool,
    station_id: i64,
    filter: &CandidateFilter,
    offset: i64,
) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT ts.track_id FROM track_stations ts JOIN tracks t ON t.track_id = ts.track_id {} \
         ORDER BY ts.track_id LIMIT 1 OFFSET ?",
        filter.where_clause()
    );

    let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(station_id);
    if let Some((min, max)) = filter.length_window {
        query = query.bind(min).bind(max);
    }
    for track_id in &filter.exclude_tracks {
        query = query.bind(*track_id);
    }

    Ok(query.bind(offset).fetch_optional(db).await?)
}

/// The registered track that has gone longest without being played
///
/// Skips `exclude`; fails with `NoAvailableTracks` when nothing is left.
pub async fn least_recently_played(
    db: &SqlitePool,
    station_id: i64,
    exclude: &[i64],
) -> Result<i64> {
    let mut sql = String::from(
        "SELECT track_id FROM track_stations WHERE station_id = ? AND track_exists = 1",
    );
    if !exclude.is_empty() {
        sql.push_str(&format!(" AND track_id NOT IN ({})", placeholders(exclude.len())));
    }
    sql.push_str(" ORDER BY played_last ASC, track_id ASC LIMIT 1");

    let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(station_id);
    for track_id in exclude {
        query = query.bind(*track_id);
    }

    query
        .fetch_optional(db)
        .await?
        .ok_or(Error::NoAvailableTracks(station_id))
}

/// Albums a track belongs to on a station
pub async fn track_albums(db: &SqlitePool, track_id: i64, station_id: i64) -> Result<Vec<AlbumRef>> {
    let rows = sqlx::query(
        r#"
        SELECT a.album_id, a.name, a.cool_time
        FROM track_albums ta
        JOIN albums a ON a.album_id = ta.album_id
        WHERE ta.track_id = ? AND ta.station_id = ?
        ORDER BY a.name
        "#,
    )
    .bind(track_id)
    .bind(station_id)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| AlbumRef {
            album_id: row.get("album_id"),
            name: row.get("name"),
            cool_time: row.get("cool_time"),
        })
        .collect())
}

pub async fn track_artists(db: &SqlitePool, track_id: i64) -> Result<Vec<ArtistRef>> {
    let rows = sqlx::query(
        r#"
        SELECT ar.artist_id, ar.name
        FROM track_artists tar
        JOIN artists ar ON ar.artist_id = tar.artist_id
        WHERE tar.track_id = ?
        ORDER BY ar.name
        "#,
    )
    .bind(track_id)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ArtistRef {
            artist_id: row.get("artist_id"),
            name: row.get("name"),
        })
        .collect())
}

pub async fn track_groups(db: &SqlitePool, track_id: i64) -> Result<Vec<GroupRef>> {
    let rows = sqlx::query(
        r#"
        SELECT g.group_id, g.name, g.elec_block, g.cool_time
        FROM track_tag_groups tg
        JOIN tag_groups g ON g.group_id = tg.group_id
        WHERE tg.track_id = ?
        ORDER BY g.name
        "#,
    )
    .bind(track_id)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| GroupRef {
            group_id: row.get("group_id"),
            name: row.get("name"),
            elec_block: row.get("elec_block"),
            cool_time: row.get("cool_time"),
        })
        .collect())
}

/// Stations a track is currently registered on
pub async fn track_stations(db: &SqlitePool, track_id: i64) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT station_id FROM track_stations WHERE track_id = ? AND track_exists = 1 ORDER BY station_id",
    )
    .bind(track_id)
    .fetch_all(db)
    .await?)
}

/// Load a track with its flags and memberships for one station
///
/// Fails with `SongHasNoStations` when the track exists nowhere, and
/// `TrackNotFound` when it exists but not on this station.
pub async fn load_track(db: &SqlitePool, track_id: i64, station_id: i64) -> Result<Track> {
    let row = sqlx::query(
        r#"
        SELECT t.track_id, t.title, t.length,
               ts.cool, ts.cool_end, ts.elec_blocked, ts.elec_blocked_by,
               ts.elec_blocked_num, ts.request_only, ts.played_last
        FROM tracks t
        JOIN track_stations ts ON ts.track_id = t.track_id
        WHERE t.track_id = ? AND ts.station_id = ?
        "#,
    )
    .bind(track_id)
    .bind(station_id)
    .fetch_optional(db)
    .await?;

    let row = match row {
        Some(row) => row,
        None => {
            if track_stations(db, track_id).await?.is_empty() {
                return Err(Error::SongHasNoStations(track_id));
            }
            return Err(Error::TrackNotFound {
                track_id,
                station_id,
            });
        }
    };

    let flags = TrackFlags {
        cool: row.get("cool"),
        cool_end: row.get("cool_end"),
        elec_blocked: row.get("elec_blocked"),
        elec_blocked_by: ElecBlockedBy::from_db(&row.get::<String, _>("elec_blocked_by")),
        elec_blocked_num: row.get("elec_blocked_num"),
        request_only: row.get("request_only"),
    };

    Ok(Track {
        track_id,
        station_id,
        title: row.get("title"),
        length: row.get("length"),
        flags,
        played_last: row.get("played_last"),
        albums: track_albums(db, track_id, station_id).await?,
        artists: track_artists(db, track_id).await?,
        groups: track_groups(db, track_id).await?,
    })
}
