//! Elections
//!
//! An election is a scheduled event holding a short ballot of tracks.
//! It is created empty, filled from the station's election queue, the
//! rationed request line and the selection cascade, then resolved on
//! start: live votes are merged, requesters get their one automatic vote,
//! and the ballot is ordered so the winner sits at position 0.

use crate::cascade;
use crate::catalog::{self, Track};
use crate::election_queue;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventState};
use crate::ledger::{self, ElecBlockedBy};
use crate::rationing::RationingState;
use crate::requests::{self, Requester};
use rand::seq::SliceRandom;
use rand::Rng;
use rw_common::db::StationSettings;
use rw_common::time::now_secs;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionType {
    #[default]
    Normal,
}

impl ElectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionType::Normal => "normal",
        }
    }
}

impl FromStr for ElectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(ElectionType::Normal),
            other => Err(Error::InvalidScheduleType(other.to_string())),
        }
    }
}

/// Provenance of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Placed for a listener who requested this track
    Request,
    /// Shares an album with another listener's request
    Conflict,
    Normal,
}

impl EntryType {
    /// Sort priority when resolving: lower floats to the front
    pub fn rank(&self) -> u8 {
        match self {
            EntryType::Request => 0,
            EntryType::Conflict => 1,
            EntryType::Normal => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Request => "request",
            EntryType::Conflict => "conflict",
            EntryType::Normal => "normal",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "request" => EntryType::Request,
            "conflict" => EntryType::Conflict,
            _ => EntryType::Normal,
        }
    }
}

/// One track on the ballot
#[derive(Debug, Clone, Serialize)]
pub struct ElectionEntry {
    pub entry_id: i64,
    pub track: Track,
    pub entry_type: EntryType,
    /// 0-based ballot position
    pub position: i64,
    pub votes: i64,
    /// Listener credited for request and conflict entries
    pub requester: Option<Requester>,
}

/// Where the entries added by one `fill` call came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillSummary {
    pub queued: usize,
    pub requested: usize,
    pub selected: usize,
}

impl FillSummary {
    pub fn total(&self) -> usize {
        self.queued + self.requested + self.selected
    }
}

#[derive(Debug, Clone)]
pub struct Election {
    pub event: Event,
    pub election_type: ElectionType,
    entries: Vec<ElectionEntry>,
}

impl Election {
    /// Create an empty election on a station
    pub async fn create(
        db: &SqlitePool,
        station_id: i64,
        election_type: ElectionType,
    ) -> Result<Self> {
        let mut tx = db.begin().await?;

        let event = Event::insert(&mut *tx, station_id, EventKind::Election, None, 0, 0).await?;
        sqlx::query("INSERT INTO elections (elec_id, station_id, elec_type) VALUES (?, ?, ?)")
            .bind(event.id)
            .bind(station_id)
            .bind(election_type.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!("Created election {} on station {}", event.id, station_id);

        Ok(Self {
            event,
            election_type,
            entries: Vec::new(),
        })
    }

    /// Load an election and its ballot in position order
    pub async fn load_by_id(db: &SqlitePool, elec_id: i64) -> Result<Self> {
        let elec_type: String =
            sqlx::query_scalar("SELECT elec_type FROM elections WHERE elec_id = ?")
                .bind(elec_id)
                .fetch_optional(db)
                .await?
                .ok_or(Error::InvalidElectionId(elec_id))?;

        let event = Event::load(db, elec_id).await?;
        let entries = load_entries(db, elec_id, event.station_id).await?;

        Ok(Self {
            event,
            election_type: elec_type.parse()?,
            entries,
        })
    }

    /// Most recently created election on a station that has not finished
    pub async fn load_latest_unused(
        db: &SqlitePool,
        station_id: i64,
        election_type: ElectionType,
    ) -> Result<Self> {
        let elec_id: i64 = sqlx::query_scalar(
            r#"
            SELECT e.elec_id
            FROM elections e
            JOIN schedule s ON s.sched_id = e.elec_id
            WHERE e.station_id = ? AND e.elec_type = ? AND s.sched_used = 0
            ORDER BY e.elec_id DESC
            LIMIT 1
            "#,
        )
        .bind(station_id)
        .bind(election_type.as_str())
        .fetch_optional(db)
        .await?
        .ok_or_else(|| {
            Error::InvalidScheduleId(format!(
                "no unused {} election on station {}",
                election_type.as_str(),
                station_id
            ))
        })?;

        Self::load_by_id(db, elec_id).await
    }

    /// The election currently on air, if any
    pub async fn load_current(db: &SqlitePool, station_id: i64) -> Result<Option<Self>> {
        let elec_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT e.elec_id
            FROM elections e
            JOIN schedule s ON s.sched_id = e.elec_id
            WHERE e.station_id = ? AND s.sched_in_progress = 1 AND s.sched_used = 0
            ORDER BY e.elec_id DESC
            LIMIT 1
            "#,
        )
        .bind(station_id)
        .fetch_optional(db)
        .await?;

        match elec_id {
            Some(id) => Ok(Some(Self::load_by_id(db, id).await?)),
            None => Ok(None),
        }
    }

    /// The oldest election still waiting to start, if any
    pub async fn load_next_pending(db: &SqlitePool, station_id: i64) -> Result<Option<Self>> {
        let elec_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT e.elec_id
            FROM elections e
            JOIN schedule s ON s.sched_id = e.elec_id
            WHERE e.station_id = ? AND s.sched_in_progress = 0 AND s.sched_used = 0
            ORDER BY e.elec_id
            LIMIT 1
            "#,
        )
        .bind(station_id)
        .fetch_optional(db)
        .await?;

        match elec_id {
            Some(id) => Ok(Some(Self::load_by_id(db, id).await?)),
            None => Ok(None),
        }
    }

    pub fn id(&self) -> i64 {
        self.event.id
    }

    pub fn station_id(&self) -> i64 {
        self.event.station_id
    }

    pub fn entries(&self) -> &[ElectionEntry] {
        &self.entries
    }

    fn contains(&self, track_id: i64) -> bool {
        self.entries.iter().any(|e| e.track.track_id == track_id)
    }

    /// Fill the ballot up to the station's `songs_in_election`
    ///
    /// Sources in order: staged tracks, one rationed request when due,
    /// then the cascade with the ballot's tracks excluded. Stops early only
    /// when the station has no track left that is not already on the
    /// ballot. Only allowed before the election starts.
    pub async fn fill<R: Rng>(
        &mut self,
        db: &SqlitePool,
        rationing: &mut RationingState,
        target_length: Option<i64>,
        rng: &mut R,
    ) -> Result<FillSummary> {
        if self.event.state() != EventState::Scheduled {
            return Err(Error::EventAlreadyUsed(self.id()));
        }

        let station_id = self.station_id();
        let settings = StationSettings::load(db, station_id).await?;
        let quota = settings.songs_in_election.max(0) as usize;
        let mut summary = FillSummary::default();

        let staged =
            election_queue::dequeue(db, station_id, quota.saturating_sub(self.entries.len()))
                .await?;
        for track_id in staged {
            if self.contains(track_id) {
                debug!("Election {}: staged track {} already on ballot", self.id(), track_id);
                continue;
            }
            let track = catalog::load_track(db, track_id, station_id).await?;
            self.add_entry(db, &settings, track, EntryType::Normal, None)
                .await?;
            summary.queued += 1;
        }

        if self.add_rationed_request(db, &settings, rationing, quota).await? {
            summary.requested += 1;
        }

        while self.entries.len() < quota {
            let on_ballot: Vec<i64> = self.entries.iter().map(|e| e.track.track_id).collect();
            let selection = match cascade::select_candidate(
                db,
                station_id,
                target_length,
                settings.target_delta,
                &on_ballot,
                rng,
            )
            .await
            {
                Ok(selection) => selection,
                Err(Error::NoAvailableTracks(_)) if !on_ballot.is_empty() => {
                    warn!(
                        "Election {}: filled {} of {} slots, station {} has nothing else to offer",
                        self.id(),
                        self.entries.len(),
                        quota,
                        station_id
                    );
                    break;
                }
                Err(e) => return Err(e),
            };

            let (entry_type, requester) = detect_conflict(db, &selection.track).await?;
            self.add_entry(db, &settings, selection.track, entry_type, requester)
                .await?;
            summary.selected += 1;
        }

        info!(
            "Election {} on station {} filled: {} staged, {} requested, {} selected",
            self.id(),
            station_id,
            summary.queued,
            summary.requested,
            summary.selected
        );

        Ok(summary)
    }

    /// Place one request when the sequencer says one is due
    ///
    /// The sequencer is consulted on every fill so its rhythm advances even
    /// when staged tracks already fill the ballot.
    async fn add_rationed_request(
        &mut self,
        db: &SqlitePool,
        settings: &StationSettings,
        rationing: &mut RationingState,
        quota: usize,
    ) -> Result<bool> {
        let station_id = self.station_id();
        let line_length = if rationing.starts_new_burst() {
            requests::length(db, station_id).await?
        } else {
            0
        };

        if !rationing.is_request_due(line_length, settings) || self.entries.len() >= quota {
            return Ok(false);
        }

        let candidate = match cascade::get_request_candidate(db, station_id).await {
            Ok(candidate) => candidate,
            Err(Error::NoRequestAvailable(_)) => {
                debug!("Station {}: request due but none playable", station_id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if self.contains(candidate.track.track_id) {
            return Ok(false);
        }

        let request_id = candidate.request.request_id;
        self.add_entry(
            db,
            settings,
            candidate.track,
            EntryType::Request,
            Some(candidate.request.requester),
        )
        .await?;
        requests::remove(db, request_id).await?;
        rationing.consume();

        Ok(true)
    }

    /// Append a track at the next position and put it under election block
    async fn add_entry(
        &mut self,
        db: &SqlitePool,
        settings: &StationSettings,
        mut track: Track,
        entry_type: EntryType,
        requester: Option<Requester>,
    ) -> Result<()> {
        let position = self.entries.len() as i64;
        let station_id = self.station_id();

        let result = sqlx::query(
            r#"
            INSERT INTO election_entries
                (elec_id, track_id, entry_position, entry_type, request_user_id, request_username)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.id())
        .bind(track.track_id)
        .bind(position)
        .bind(entry_type.as_str())
        .bind(requester.as_ref().map(|r| r.user_id))
        .bind(requester.as_ref().map(|r| r.username.as_str()))
        .execute(db)
        .await?;

        ledger::set_election_block(
            db,
            track.track_id,
            station_id,
            ElecBlockedBy::InElection,
            settings.elec_block_length,
        )
        .await?;
        ledger::start_group_blocks(db, &track).await?;
        ledger::mark_election_appearance(db, track.track_id, station_id, now_secs()).await?;
        track.flags = ledger::read_flags(db, track.track_id, station_id).await?;

        debug!(
            "Election {}: track {} at position {} ({})",
            self.id(),
            track.track_id,
            position,
            entry_type.as_str()
        );

        self.entries.push(ElectionEntry {
            entry_id: result.last_insert_rowid(),
            track,
            entry_type,
            position,
            votes: 0,
            requester,
        });

        Ok(())
    }

    /// Resolve the ballot and put the election on air
    ///
    /// Returns `Ok(false)` without touching votes or order when already in
    /// progress. Fails with `EventAlreadyUsed` once finished.
    pub async fn start<R: Rng>(&mut self, db: &SqlitePool, rng: &mut R) -> Result<bool> {
        match self.event.state() {
            EventState::Finished => return Err(Error::EventAlreadyUsed(self.id())),
            EventState::InProgress => return Ok(false),
            EventState::Scheduled => {}
        }

        self.merge_votes(db).await?;
        self.grant_request_votes(db).await?;

        // Shuffle first so equal type and votes resolve randomly
        self.entries.shuffle(rng);
        self.entries
            .sort_by_key(|e| (e.entry_type.rank(), Reverse(e.votes)));

        let mut tx = db.begin().await?;
        for (position, entry) in self.entries.iter_mut().enumerate() {
            entry.position = position as i64;
            sqlx::query("UPDATE election_entries SET entry_position = ? WHERE entry_id = ?")
                .bind(entry.position)
                .bind(entry.entry_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.event.start(db).await?;

        if let Some(winner) = self.entries.first() {
            info!(
                "Election {} started on station {}: track {} wins with {} votes",
                self.id(),
                self.station_id(),
                winner.track.track_id,
                winner.votes
            );
        }

        Ok(true)
    }

    async fn merge_votes(&mut self, db: &SqlitePool) -> Result<()> {
        let rows = sqlx::query("SELECT track_id, elec_votes FROM election_entries WHERE elec_id = ?")
            .bind(self.id())
            .fetch_all(db)
            .await?;

        let live: HashMap<i64, i64> = rows
            .iter()
            .map(|row| (row.get("track_id"), row.get("elec_votes")))
            .collect();

        for entry in &mut self.entries {
            if let Some(votes) = live.get(&entry.track.track_id) {
                entry.votes = *votes;
            }
        }

        Ok(())
    }

    /// One automatic vote per requester who has not voted in this election
    async fn grant_request_votes(&mut self, db: &SqlitePool) -> Result<()> {
        let elec_id = self.id();

        for entry in &mut self.entries {
            if entry.entry_type != EntryType::Request {
                continue;
            }
            let Some(user_id) = entry.requester.as_ref().map(|r| r.user_id) else {
                continue;
            };
            if requests::has_prior_vote_credit(db, user_id, elec_id).await? {
                continue;
            }

            record_vote(db, elec_id, user_id, entry).await?;
            entry.votes += 1;
            debug!(
                "Election {}: requester {} credited on track {}",
                elec_id, user_id, entry.track.track_id
            );
        }

        Ok(())
    }

    /// Record one listener vote for a track on the ballot
    ///
    /// Each listener votes once per election.
    pub async fn cast_vote(&mut self, db: &SqlitePool, user_id: i64, track_id: i64) -> Result<()> {
        let elec_id = self.id();
        let station_id = self.station_id();

        if self.event.used {
            return Err(Error::EventAlreadyUsed(elec_id));
        }
        if requests::has_prior_vote_credit(db, user_id, elec_id).await? {
            return Err(Error::AlreadyVoted { user_id, elec_id });
        }

        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.track.track_id == track_id)
            .ok_or(Error::TrackNotFound {
                track_id,
                station_id,
            })?;

        record_vote(db, elec_id, user_id, entry).await?;
        entry.votes += 1;

        Ok(())
    }

    /// Take the election off air; the ballot order is left as resolved
    pub async fn finish(&mut self, db: &SqlitePool) -> Result<()> {
        self.event.finish(db).await?;
        info!("Election {} on station {} finished", self.id(), self.station_id());
        Ok(())
    }

    /// Winning entry, once the election has started
    pub fn get_result(&self) -> Option<&ElectionEntry> {
        if self.event.state() == EventState::Scheduled {
            return None;
        }
        self.entries.first()
    }

    /// Expected air time in seconds
    ///
    /// The winner's length once finished, otherwise the floored mean over
    /// the ballot.
    pub fn length(&self) -> Result<i64> {
        let first = self
            .entries
            .first()
            .ok_or(Error::EmptyElection(self.id()))?;

        if self.event.used {
            return Ok(first.track.length);
        }

        let total: i64 = self.entries.iter().map(|e| e.track.length).sum();
        Ok(total.div_euclid(self.entries.len() as i64))
    }
}

/// Tag a cascade pick that collides with a listener request
///
/// An album-level requester wins over a direct track requester.
async fn detect_conflict(db: &SqlitePool, track: &Track) -> Result<(EntryType, Option<Requester>)> {
    if let Some(requester) = requests::album_requester(db, track.track_id, track.station_id).await? {
        return Ok((EntryType::Conflict, Some(requester)));
    }
    if let Some(requester) = requests::track_requester(db, track.track_id, track.station_id).await? {
        return Ok((EntryType::Request, Some(requester)));
    }
    Ok((EntryType::Normal, None))
}

async fn record_vote(
    db: &SqlitePool,
    elec_id: i64,
    user_id: i64,
    entry: &ElectionEntry,
) -> Result<()> {
    let mut tx = db.begin().await?;

    sqlx::query("UPDATE election_entries SET elec_votes = elec_votes + 1 WHERE entry_id = ?")
        .bind(entry.entry_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO vote_history (user_id, elec_id, entry_id, track_id, voted_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(elec_id)
    .bind(entry.entry_id)
    .bind(entry.track.track_id)
    .bind(now_secs())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

async fn load_entries(
    db: &SqlitePool,
    elec_id: i64,
    station_id: i64,
) -> Result<Vec<ElectionEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT entry_id, track_id, entry_position, entry_type, elec_votes,
               request_user_id, request_username
        FROM election_entries
        WHERE elec_id = ?
        ORDER BY entry_position
        "#,
    )
    .bind(elec_id)
    .fetch_all(db)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let track_id: i64 = row.get("track_id");
        let requester = row
            .get::<Option<i64>, _>("request_user_id")
            .map(|user_id| Requester {
                user_id,
                username: row
                    .get::<Option<String>, _>("request_username")
                    .unwrap_or_default(),
            });

        entries.push(ElectionEntry {
            entry_id: row.get("entry_id"),
            track: catalog::load_track(db, track_id, station_id).await?,
            entry_type: EntryType::from_db(&row.get::<String, _>("entry_type")),
            position: row.get("entry_position"),
            votes: row.get("elec_votes"),
            requester,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rw_common::db::{set_station_setting, ELEC_BLOCK_LENGTH, SONGS_IN_ELECTION};
    use std::collections::HashSet;

    fn not_due() -> RationingState {
        RationingState::new(2, 0)
    }

    fn assert_positions_contiguous(election: &Election) {
        let positions: Vec<i64> = election.entries().iter().map(|e| e.position).collect();
        let expected: Vec<i64> = (0..election.entries().len() as i64).collect();
        assert_eq!(positions, expected);

        let tracks: HashSet<i64> = election.entries().iter().map(|e| e.track.track_id).collect();
        assert_eq!(tracks.len(), election.entries().len());
    }

    async fn filled_election(db: &SqlitePool, seed: u64) -> Election {
        let mut election = Election::create(db, STATION, ElectionType::Normal).await.unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        election
            .fill(db, &mut not_due(), None, &mut rng)
            .await
            .unwrap();
        election
    }

    async fn vote_many(db: &SqlitePool, election: &mut Election, track_id: i64, users: std::ops::Range<i64>) {
        for user_id in users {
            election.cast_vote(db, user_id, track_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let db = station_db().await;
        let election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();

        let loaded = Election::load_by_id(&db, election.id()).await.unwrap();
        assert_eq!(loaded.event, election.event);
        assert_eq!(loaded.election_type, ElectionType::Normal);
        assert!(loaded.entries().is_empty());
        assert!(loaded.get_result().is_none());
    }

    #[tokio::test]
    async fn test_load_misses() {
        let db = station_db().await;

        let result = Election::load_by_id(&db, 42).await;
        assert!(matches!(result, Err(Error::InvalidElectionId(42))));

        let result = Election::load_latest_unused(&db, STATION, ElectionType::Normal).await;
        assert!(matches!(result, Err(Error::InvalidScheduleId(_))));
    }

    #[tokio::test]
    async fn test_load_latest_unused_skips_finished() {
        let db = station_db().await;
        let older = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut newer = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        newer.finish(&db).await.unwrap();

        let loaded = Election::load_latest_unused(&db, STATION, ElectionType::Normal)
            .await
            .unwrap();
        assert_eq!(loaded.id(), older.id());
    }

    #[tokio::test]
    async fn test_fill_from_constrained_tier() {
        let db = station_db().await;
        add_track(&db, 1, 200).await;
        add_track(&db, 2, 210).await;
        add_track(&db, 3, 190).await;

        let mut election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut rationing = not_due();
        let mut rng = StdRng::seed_from_u64(3);
        let summary = election
            .fill(&db, &mut rationing, Some(400), &mut rng)
            .await
            .unwrap();

        assert_eq!(summary.selected, 3);
        assert_eq!(summary.total(), 3);
        assert_eq!(election.entries().len(), 3);
        assert!(election.entries().iter().all(|e| e.entry_type == EntryType::Normal));
        assert_positions_contiguous(&election);
        assert_eq!(rationing, RationingState::new(1, 0));

        for entry in election.entries() {
            assert!(entry.track.flags.elec_blocked);
            assert_eq!(entry.track.flags.elec_blocked_by, ElecBlockedBy::InElection);
        }
    }

    #[tokio::test]
    async fn test_fill_stops_when_station_runs_dry() {
        let db = station_db().await;
        add_track(&db, 1, 180).await;
        add_track(&db, 2, 180).await;

        let election = filled_election(&db, 1).await;
        assert_eq!(election.entries().len(), 2);
        assert_positions_contiguous(&election);
    }

    #[tokio::test]
    async fn test_fill_without_block_length_meets_quota() {
        let db = station_db().await;
        set_station_setting(&db, STATION, ELEC_BLOCK_LENGTH, 0).await.unwrap();
        set_station_setting(&db, STATION, SONGS_IN_ELECTION, 5).await.unwrap();
        for track_id in 1..=6 {
            add_track(&db, track_id, 180).await;
        }

        // Tracks stay eligible between draws, so every seed must still
        // produce a full ballot of distinct tracks
        for seed in 0..50 {
            let election = filled_election(&db, seed).await;
            assert_eq!(election.entries().len(), 5, "seed {}", seed);
            assert_positions_contiguous(&election);
        }
    }

    #[tokio::test]
    async fn test_fill_on_starved_station_takes_stalest_tracks() {
        let db = station_db().await;
        for track_id in 1..=6 {
            add_track(&db, track_id, 180).await;
            set_cool(&db, track_id, true, i64::MAX).await;
            set_played_last(&db, track_id, 1000 - track_id * 10).await;
        }

        let election = filled_election(&db, 4).await;
        let tracks: Vec<i64> = election.entries().iter().map(|e| e.track.track_id).collect();
        assert_eq!(tracks, vec![6, 5, 4]);
        assert_positions_contiguous(&election);
    }

    #[tokio::test]
    async fn test_fill_is_capped_across_calls() {
        let db = station_db().await;
        for track_id in 1..=8 {
            add_track(&db, track_id, 180).await;
        }
        set_station_setting(&db, STATION, SONGS_IN_ELECTION, 2).await.unwrap();

        let mut election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        election.fill(&db, &mut not_due(), None, &mut rng).await.unwrap();

        set_station_setting(&db, STATION, SONGS_IN_ELECTION, 4).await.unwrap();
        let summary = election.fill(&db, &mut not_due(), None, &mut rng).await.unwrap();
        assert_eq!(summary.selected, 2);

        let summary = election.fill(&db, &mut not_due(), None, &mut rng).await.unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(election.entries().len(), 4);
        assert_positions_contiguous(&election);

        let loaded = Election::load_by_id(&db, election.id()).await.unwrap();
        assert_positions_contiguous(&loaded);
    }

    #[tokio::test]
    async fn test_fill_drains_election_queue_first() {
        let db = station_db().await;
        for track_id in 1..=5 {
            add_track(&db, track_id, 180).await;
        }
        election_queue::stage(&db, STATION, 4).await.unwrap();
        election_queue::stage(&db, STATION, 2).await.unwrap();

        let election = filled_election(&db, 11).await;
        assert_eq!(election.entries()[0].track.track_id, 4);
        assert_eq!(election.entries()[1].track.track_id, 2);
        assert_eq!(election.entries().len(), 3);
        assert_eq!(election_queue::length(&db, STATION).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_full_staging_still_advances_rationing() {
        let db = station_db().await;
        for track_id in 1..=5 {
            add_track(&db, track_id, 180).await;
        }
        for track_id in 1..=3 {
            election_queue::stage(&db, STATION, track_id).await.unwrap();
        }

        let mut election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut rationing = not_due();
        let mut rng = StdRng::seed_from_u64(6);
        let summary = election.fill(&db, &mut rationing, None, &mut rng).await.unwrap();

        assert_eq!(summary.queued, 3);
        assert_eq!(summary.total(), 3);
        assert_eq!(rationing, RationingState::new(1, 0));
    }

    #[tokio::test]
    async fn test_due_request_waits_when_staging_fills_ballot() {
        let db = station_db().await;
        for track_id in 1..=5 {
            add_track(&db, track_id, 180).await;
        }
        add_listener(&db, 10, false).await;
        requests::submit(&db, STATION, 10, 5, 100).await.unwrap();
        for track_id in 1..=3 {
            election_queue::stage(&db, STATION, track_id).await.unwrap();
        }

        let mut election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut rationing = RationingState::default();
        let mut rng = StdRng::seed_from_u64(6);
        let summary = election.fill(&db, &mut rationing, None, &mut rng).await.unwrap();

        assert_eq!(summary.requested, 0);
        assert_eq!(requests::length(&db, STATION).await.unwrap(), 1);
        // The burst opened and is carried to the next election
        assert_eq!(rationing.sequence, 1);
    }

    #[tokio::test]
    async fn test_fill_places_due_request() {
        let db = station_db().await;
        for track_id in 1..=5 {
            add_track(&db, track_id, 180).await;
        }
        add_listener(&db, 10, false).await;
        requests::submit(&db, STATION, 10, 3, 100).await.unwrap();

        let mut election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut rationing = RationingState::default();
        let mut rng = StdRng::seed_from_u64(2);
        let summary = election.fill(&db, &mut rationing, None, &mut rng).await.unwrap();

        assert_eq!(summary.requested, 1);
        let entry = &election.entries()[0];
        assert_eq!(entry.track.track_id, 3);
        assert_eq!(entry.entry_type, EntryType::Request);
        assert_eq!(entry.requester.as_ref().map(|r| r.user_id), Some(10));

        assert_eq!(requests::length(&db, STATION).await.unwrap(), 0);
        assert_eq!(rationing, RationingState::new(2, 0));
    }

    #[tokio::test]
    async fn test_fill_falls_back_when_no_request_playable() {
        let db = station_db().await;
        for track_id in 1..=4 {
            add_track(&db, track_id, 180).await;
        }
        add_listener(&db, 10, false).await;
        set_cool(&db, 4, true, i64::MAX).await;
        requests::submit(&db, STATION, 10, 4, 100).await.unwrap();

        let mut election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut rationing = RationingState::default();
        let mut rng = StdRng::seed_from_u64(2);
        let summary = election.fill(&db, &mut rationing, None, &mut rng).await.unwrap();

        assert_eq!(summary.requested, 0);
        assert_eq!(summary.selected, 3);
        assert_eq!(requests::length(&db, STATION).await.unwrap(), 1);
        // Burst stays open until a request is actually placed
        assert_eq!(rationing.sequence, 1);
    }

    #[tokio::test]
    async fn test_fill_refused_after_start() {
        let db = station_db().await;
        add_track(&db, 1, 180).await;
        let mut election = filled_election(&db, 1).await;
        let mut rng = StdRng::seed_from_u64(1);
        election.start(&db, &mut rng).await.unwrap();

        let result = election.fill(&db, &mut not_due(), None, &mut rng).await;
        assert!(matches!(result, Err(Error::EventAlreadyUsed(_))));
    }

    #[tokio::test]
    async fn test_conflict_detection_precedence() {
        let db = station_db().await;
        for track_id in 1..=3 {
            add_track(&db, track_id, 180).await;
        }
        add_album(&db, 1, None, &[1, 2]).await;
        add_listener(&db, 10, false).await;
        add_listener(&db, 11, false).await;
        requests::submit(&db, STATION, 10, 2, 100).await.unwrap();
        requests::submit(&db, STATION, 11, 1, 101).await.unwrap();
        requests::submit(&db, STATION, 11, 3, 102).await.unwrap();

        let track = catalog::load_track(&db, 1, STATION).await.unwrap();
        let (entry_type, requester) = detect_conflict(&db, &track).await.unwrap();
        assert_eq!(entry_type, EntryType::Conflict);
        assert_eq!(requester.map(|r| r.user_id), Some(10));

        let track = catalog::load_track(&db, 3, STATION).await.unwrap();
        let (entry_type, requester) = detect_conflict(&db, &track).await.unwrap();
        assert_eq!(entry_type, EntryType::Request);
        assert_eq!(requester.map(|r| r.user_id), Some(11));
    }

    #[tokio::test]
    async fn test_conflict_detection_needs_a_request() {
        let db = station_db().await;
        add_track(&db, 1, 180).await;
        add_track(&db, 2, 180).await;
        add_album(&db, 1, None, &[1, 2]).await;
        add_listener(&db, 10, true).await;
        requests::submit(&db, STATION, 10, 2, 100).await.unwrap();

        let track = catalog::load_track(&db, 1, STATION).await.unwrap();
        let (entry_type, requester) = detect_conflict(&db, &track).await.unwrap();
        assert_eq!(entry_type, EntryType::Normal);
        assert!(requester.is_none());
    }

    #[tokio::test]
    async fn test_start_orders_by_votes() {
        let db = station_db().await;
        add_track(&db, 1, 180).await;
        add_track(&db, 2, 180).await;
        add_track(&db, 3, 180).await;

        let mut election = filled_election(&db, 4).await;
        vote_many(&db, &mut election, 1, 0..5).await;
        vote_many(&db, &mut election, 2, 5..10).await;
        vote_many(&db, &mut election, 3, 10..12).await;

        let mut rng = StdRng::seed_from_u64(17);
        assert!(election.start(&db, &mut rng).await.unwrap());
        election.finish(&db).await.unwrap();

        let winner = election.get_result().unwrap();
        assert!(winner.track.track_id == 1 || winner.track.track_id == 2);
        assert_eq!(winner.votes, 5);
        assert_eq!(election.entries()[2].track.track_id, 3);
        assert_positions_contiguous(&election);

        let loaded = Election::load_by_id(&db, election.id()).await.unwrap();
        assert_eq!(loaded.get_result().unwrap().track.track_id, winner.track.track_id);
    }

    #[tokio::test]
    async fn test_start_tie_break_follows_seed() {
        let db = station_db().await;
        add_track(&db, 1, 180).await;
        add_track(&db, 2, 180).await;

        let mut winners = HashSet::new();
        for seed in 0..16 {
            sqlx::query("UPDATE track_stations SET elec_blocked = 0, elec_blocked_num = 0")
                .execute(&db)
                .await
                .unwrap();
            let mut election = filled_election(&db, seed).await;
            let mut rng = StdRng::seed_from_u64(seed);
            election.start(&db, &mut rng).await.unwrap();
            winners.insert(election.get_result().unwrap().track.track_id);
        }

        assert_eq!(winners, HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_start_puts_requests_first() {
        let db = station_db().await;
        for track_id in 1..=3 {
            add_track(&db, track_id, 180).await;
        }
        add_listener(&db, 10, false).await;
        requests::submit(&db, STATION, 10, 3, 100).await.unwrap();

        let mut election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        election
            .fill(&db, &mut RationingState::default(), None, &mut rng)
            .await
            .unwrap();

        let other = election
            .entries()
            .iter()
            .find(|e| e.entry_type == EntryType::Normal)
            .map(|e| e.track.track_id)
            .unwrap();
        vote_many(&db, &mut election, other, 0..5).await;

        election.start(&db, &mut rng).await.unwrap();
        let winner = election.get_result().unwrap();
        assert_eq!(winner.track.track_id, 3);
        assert_eq!(winner.entry_type, EntryType::Request);
        // Automatic requester vote
        assert_eq!(winner.votes, 1);
    }

    #[tokio::test]
    async fn test_requester_who_voted_gets_no_extra_credit() {
        let db = station_db().await;
        for track_id in 1..=3 {
            add_track(&db, track_id, 180).await;
        }
        add_listener(&db, 10, false).await;
        requests::submit(&db, STATION, 10, 3, 100).await.unwrap();

        let mut election = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        let mut rng = StdRng::seed_from_u64(8);
        election
            .fill(&db, &mut RationingState::default(), None, &mut rng)
            .await
            .unwrap();
        election.cast_vote(&db, 10, 3).await.unwrap();

        election.start(&db, &mut rng).await.unwrap();
        let entry = election.entries().iter().find(|e| e.track.track_id == 3).unwrap();
        assert_eq!(entry.votes, 1);

        let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vote_history WHERE user_id = 10")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(history, 1);
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let db = station_db().await;
        for track_id in 1..=3 {
            add_track(&db, track_id, 180).await;
        }
        let mut election = filled_election(&db, 6).await;
        let mut rng = StdRng::seed_from_u64(6);
        assert!(election.start(&db, &mut rng).await.unwrap());

        let order: Vec<(i64, i64)> = election
            .entries()
            .iter()
            .map(|e| (e.track.track_id, e.votes))
            .collect();

        let last = election.entries()[2].track.track_id;
        vote_many(&db, &mut election, last, 0..3).await;
        let mut stored = Election::load_by_id(&db, election.id()).await.unwrap();

        assert!(!stored.start(&db, &mut rng).await.unwrap());
        let after: Vec<(i64, i64)> = stored
            .entries()
            .iter()
            .map(|e| (e.track.track_id, e.votes))
            .collect();
        assert_eq!(after[0], order[0]);
        assert_eq!(after[1], order[1]);
        assert_eq!(after[2].0, last);
    }

    #[tokio::test]
    async fn test_start_after_finish_fails() {
        let db = station_db().await;
        add_track(&db, 1, 180).await;
        let mut election = filled_election(&db, 1).await;
        election.finish(&db).await.unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let result = election.start(&db, &mut rng).await;
        assert!(matches!(result, Err(Error::EventAlreadyUsed(_))));
    }

    #[tokio::test]
    async fn test_cast_vote_rules() {
        let db = station_db().await;
        add_track(&db, 1, 180).await;
        let mut election = filled_election(&db, 1).await;

        election.cast_vote(&db, 5, 1).await.unwrap();
        let again = election.cast_vote(&db, 5, 1).await;
        assert!(matches!(again, Err(Error::AlreadyVoted { user_id: 5, .. })));

        let off_ballot = election.cast_vote(&db, 6, 99).await;
        assert!(matches!(off_ballot, Err(Error::TrackNotFound { track_id: 99, .. })));

        election.finish(&db).await.unwrap();
        let late = election.cast_vote(&db, 7, 1).await;
        assert!(matches!(late, Err(Error::EventAlreadyUsed(_))));
    }

    #[tokio::test]
    async fn test_length() {
        let db = station_db().await;
        let empty = Election::create(&db, STATION, ElectionType::Normal).await.unwrap();
        assert!(matches!(empty.length(), Err(Error::EmptyElection(_))));

        add_track(&db, 1, 200).await;
        add_track(&db, 2, 201).await;
        let mut election = filled_election(&db, 2).await;
        assert_eq!(election.length().unwrap(), 200);

        let mut rng = StdRng::seed_from_u64(2);
        election.start(&db, &mut rng).await.unwrap();
        election.finish(&db).await.unwrap();
        let winner_length = election.get_result().unwrap().track.length;
        assert_eq!(election.length().unwrap(), winner_length);
    }
}
