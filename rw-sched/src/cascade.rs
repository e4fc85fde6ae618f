//! Song selection cascade
//!
//! Four tiers, each strictly more permissive than the one before:
//!
//! 1. **Timed**: every exclusion, length within `target ± delta`
//! 2. **Constrained**: every exclusion, any length
//! 3. **IgnoreRequests**: only cooldown and election-block exclusions
//! 4. **IgnoreAll**: the least recently played track, no exclusions
//!
//! Tiers 1-3 draw uniformly at random by counting the eligible rows,
//! drawing an offset in `[0, count)` and fetching that row. Tier 4 is the
//! terminal fallback and returns a track whenever the station has one.

use crate::catalog::{self, CandidateFilter, Track};
use crate::error::Result;
use crate::requests::{self, Request};
use rand::Rng;
use sqlx::SqlitePool;
use tracing::debug;

/// Cascade tier that produced a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTier {
    Timed,
    Constrained,
    IgnoreRequests,
    IgnoreAll,
}

/// A track chosen by the cascade
#[derive(Debug, Clone)]
pub struct Selection {
    pub track: Track,
    pub tier: SelectionTier,
}

/// A playable request pulled off the request line
#[derive(Debug, Clone)]
pub struct RequestCandidate {
    pub track: Track,
    pub request: Request,
}

/// Uniform draw over the candidate set of a filter
///
/// Returns None when the set is empty.
pub async fn random_candidate<R: Rng>(
    db: &SqlitePool,
    station_id: i64,
    filter: &CandidateFilter,
    rng: &mut R,
) -> Result<Option<i64>> {
    let count = catalog::candidate_count(db, station_id, filter).await?;
    if count <= 0 {
        return Ok(None);
    }

    let offset = rng.gen_range(0..count);
    catalog::candidate_at_offset(db, station_id, filter, offset).await
}

/// Select one track for a station
///
/// `target_length` enables the timed tier; `target_delta` is the half-width
/// of its length window. Tracks in `exclude` are skipped by every tier.
/// Fails only when the station has no track outside `exclude`.
pub async fn select_candidate<R: Rng>(
    db: &SqlitePool,
    station_id: i64,
    target_length: Option<i64>,
    target_delta: i64,
    exclude: &[i64],
    rng: &mut R,
) -> Result<Selection> {
    let mut tiers = Vec::with_capacity(3);
    if let Some(target) = target_length {
        tiers.push((
            SelectionTier::Timed,
            CandidateFilter::timed(target, target_delta).excluding(exclude),
        ));
    }
    tiers.push((SelectionTier::Constrained, CandidateFilter::constrained().excluding(exclude)));
    tiers.push((SelectionTier::IgnoreRequests, CandidateFilter::available().excluding(exclude)));

    for (tier, filter) in tiers {
        if let Some(track_id) = random_candidate(db, station_id, &filter, rng).await? {
            debug!("Station {}: selected track {} ({:?})", station_id, track_id, tier);
            return Ok(Selection {
                track: catalog::load_track(db, track_id, station_id).await?,
                tier,
            });
        }
    }

    let track_id = catalog::least_recently_played(db, station_id, exclude).await?;
    debug!(
        "Station {}: every constrained tier empty, falling back to stalest track {}",
        station_id, track_id
    );

    Ok(Selection {
        track: catalog::load_track(db, track_id, station_id).await?,
        tier: SelectionTier::IgnoreAll,
    })
}

/// Earliest-arrived playable request, tagged with its requester
///
/// Fails with `NoRequestAvailable` when nothing in the line is eligible;
/// callers then fall back to [`select_candidate`].
pub async fn get_request_candidate(db: &SqlitePool, station_id: i64) -> Result<RequestCandidate> {
    let request = requests::earliest_valid(db, station_id).await?;
    let track = catalog::load_track(db, request.track_id, station_id).await?;

    Ok(RequestCandidate { track, request })
}
