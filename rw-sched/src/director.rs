//! Per-station scheduling driver
//!
//! Each station is advanced serially behind its own lock while stations
//! run concurrently with one another. The director owns the per-station
//! rationing counters and RNG, hydrating counters from the database on
//! first use and persisting them after every fill.

use crate::election::{Election, ElectionType, EntryType};
use crate::error::Result;
use crate::ledger::{self, ElecBlockedBy};
use crate::rationing::RationingState;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rw_common::db::StationSettings;
use rw_common::events::{EventBus, ScheduleEvent};
use rw_common::time::{now, now_secs};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

struct StationState {
    /// None until hydrated from `station_vars`
    rationing: Option<RationingState>,
    rng: StdRng,
}

#[derive(Clone)]
pub struct Director {
    db: SqlitePool,
    events: EventBus,
    stations: Arc<BTreeMap<i64, Arc<Mutex<StationState>>>>,
}

impl Director {
    pub fn new(db: SqlitePool, events: EventBus, station_ids: &[i64]) -> Self {
        Self::build(db, events, station_ids, |_| StdRng::from_entropy())
    }

    /// Director with reproducible per-station randomness
    pub fn with_seed(db: SqlitePool, events: EventBus, station_ids: &[i64], seed: u64) -> Self {
        Self::build(db, events, station_ids, |station_id| {
            StdRng::seed_from_u64(seed ^ station_id as u64)
        })
    }

    fn build(
        db: SqlitePool,
        events: EventBus,
        station_ids: &[i64],
        mut make_rng: impl FnMut(i64) -> StdRng,
    ) -> Self {
        let stations = station_ids
            .iter()
            .map(|&station_id| {
                let state = StationState {
                    rationing: None,
                    rng: make_rng(station_id),
                };
                (station_id, Arc::new(Mutex::new(state)))
            })
            .collect();

        Self {
            db,
            events,
            stations: Arc::new(stations),
        }
    }

    pub fn station_ids(&self) -> Vec<i64> {
        self.stations.keys().copied().collect()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn station(&self, station_id: i64) -> Result<Arc<Mutex<StationState>>> {
        self.stations.get(&station_id).cloned().ok_or_else(|| {
            rw_common::Error::NotFound(format!("Station {} is not scheduled", station_id)).into()
        })
    }

    /// Create and fill the next election for a station
    ///
    /// `target_length` steers the cascade toward tracks of about that many
    /// seconds.
    pub async fn prepare_next(&self, station_id: i64, target_length: Option<i64>) -> Result<Election> {
        let station = self.station(station_id)?;
        let mut state = station.lock().await;
        self.prepare_locked(&mut state, station_id, target_length).await
    }

    /// Finish the election on air and start the next one
    ///
    /// Prepares a fresh election when none is waiting. Returns the
    /// election now on air.
    pub async fn advance(&self, station_id: i64) -> Result<Option<Election>> {
        let station = self.station(station_id)?;
        let mut state = station.lock().await;
        self.advance_locked(&mut state, station_id).await
    }

    /// Advance a station whose current election has run its course, and
    /// keep one election waiting behind it
    pub async fn tick_station(&self, station_id: i64) -> Result<()> {
        let station = self.station(station_id)?;
        let mut state = station.lock().await;

        let now = now_secs();
        let due = match Election::load_current(&self.db, station_id).await? {
            Some(current) => match (current.event.actual_start, current.get_result()) {
                (Some(started), Some(winner)) => now >= started + winner.track.length,
                _ => true,
            },
            None => true,
        };

        if due {
            self.advance_locked(&mut state, station_id).await?;
        }

        if Election::load_next_pending(&self.db, station_id)
            .await?
            .is_none()
        {
            self.prepare_locked(&mut state, station_id, None).await?;
        }

        Ok(())
    }

    /// Tick every station concurrently
    pub async fn tick(&self) {
        let mut tasks = JoinSet::new();
        for &station_id in self.stations.keys() {
            let director = self.clone();
            tasks.spawn(async move { (station_id, director.tick_station(station_id).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((station_id, Err(e))) => error!("Station {} tick failed: {}", station_id, e),
                Err(e) => error!("Station tick task failed: {}", e),
            }
        }
    }

    /// Tick on a fixed interval until `shutdown` resolves
    pub async fn run<F>(self, tick: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Director running for stations {:?} every {:?}",
            self.station_ids(),
            tick
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Director stopped");
                    break;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    async fn prepare_locked(
        &self,
        state: &mut StationState,
        station_id: i64,
        target_length: Option<i64>,
    ) -> Result<Election> {
        let now_ts = now_secs();

        let cleared = ledger::clear_expired_cooldowns(&self.db, station_id, now_ts).await?;
        if cleared > 0 {
            self.events.emit_lossy(ScheduleEvent::CooldownsCleared {
                station_id,
                count: cleared,
                timestamp: now(),
            });
        }

        let mut rationing = match state.rationing {
            Some(rationing) => rationing,
            None => RationingState::load(&self.db, station_id).await?,
        };

        let mut election = Election::create(&self.db, station_id, ElectionType::Normal).await?;
        self.events.emit_lossy(ScheduleEvent::ElectionCreated {
            station_id,
            elec_id: election.id(),
            timestamp: now(),
        });

        let filled = election
            .fill(&self.db, &mut rationing, target_length, &mut state.rng)
            .await;

        // A failed fill may already have placed a request
        state.rationing = Some(rationing);
        rationing.save(&self.db, station_id).await?;

        if let Err(e) = filled {
            warn!(
                "Station {}: fill of election {} failed, retiring it: {}",
                station_id,
                election.id(),
                e
            );
            election.finish(&self.db).await?;
            return Err(e);
        }

        if !election.entries().is_empty() {
            let start = self.next_start(station_id, now_ts).await?;
            let end = start + election.length()?;
            election.event.reschedule(&self.db, start, end).await?;
        }

        for entry in election.entries() {
            if entry.entry_type != EntryType::Request {
                continue;
            }
            if let Some(requester) = &entry.requester {
                self.events.emit_lossy(ScheduleEvent::RequestInserted {
                    station_id,
                    elec_id: election.id(),
                    track_id: entry.track.track_id,
                    user_id: requester.user_id,
                    timestamp: now(),
                });
            }
        }

        self.events.emit_lossy(ScheduleEvent::ElectionFilled {
            station_id,
            elec_id: election.id(),
            track_ids: election.entries().iter().map(|e| e.track.track_id).collect(),
            timestamp: now(),
        });

        Ok(election)
    }

    async fn advance_locked(
        &self,
        state: &mut StationState,
        station_id: i64,
    ) -> Result<Option<Election>> {
        if let Some(mut current) = Election::load_current(&self.db, station_id).await? {
            self.close_out(&mut current).await?;
        }

        let mut next = match Election::load_next_pending(&self.db, station_id).await? {
            Some(election) => election,
            None => self.prepare_locked(state, station_id, None).await?,
        };

        if next.entries().is_empty() {
            warn!(
                "Station {}: election {} has nothing to play, retiring it",
                station_id,
                next.id()
            );
            next.finish(&self.db).await?;
            return Ok(None);
        }

        next.start(&self.db, &mut state.rng).await?;

        if let Some(winner) = next.get_result() {
            ledger::set_election_block(
                &self.db,
                winner.track.track_id,
                station_id,
                ElecBlockedBy::CooldownPending,
                1,
            )
            .await?;
            self.events.emit_lossy(ScheduleEvent::ElectionStarted {
                station_id,
                elec_id: next.id(),
                winner_track_id: winner.track.track_id,
                timestamp: now(),
            });
        }

        Ok(Some(next))
    }

    /// Finish an election and apply its after-play bookkeeping
    async fn close_out(&self, election: &mut Election) -> Result<()> {
        let station_id = election.station_id();
        let settings = StationSettings::load(&self.db, station_id).await?;
        let now_ts = now_secs();

        election.finish(&self.db).await?;

        let winner = election.get_result().map(|entry| entry.track.clone());
        if let Some(track) = &winner {
            ledger::mark_played(&self.db, track.track_id, station_id, now_ts).await?;
            ledger::start_cooldown(&self.db, track, now_ts, settings.cooldown_seconds).await?;
        }

        let unblocked = ledger::tick_election_blocks(&self.db, station_id).await?;
        debug!(
            "Station {}: election {} closed, {} tracks unblocked",
            station_id,
            election.id(),
            unblocked
        );

        self.events.emit_lossy(ScheduleEvent::ElectionFinished {
            station_id,
            elec_id: election.id(),
            winner_track_id: winner.map(|track| track.track_id),
            timestamp: now(),
        });

        Ok(())
    }

    /// When a newly prepared election would go to air
    async fn next_start(&self, station_id: i64, now_ts: i64) -> Result<i64> {
        let current = Election::load_current(&self.db, station_id).await?;

        Ok(current
            .and_then(|election| {
                let started = election.event.actual_start?;
                let winner = election.get_result()?;
                Some(started + winner.track.length)
            })
            .map_or(now_ts, |end| end.max(now_ts)))
    }
}
