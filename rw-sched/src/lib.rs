//! rw-sched: election scheduling core
//!
//! Builds the ballots listeners vote on, decides when their requests get
//! airtime, and keeps recently played tracks out of rotation.

pub mod cascade;
pub mod catalog;
pub mod director;
pub mod election;
pub mod election_queue;
pub mod error;
pub mod event;
pub mod ledger;
pub mod rationing;
pub mod requests;

#[cfg(test)]
mod test_support;

pub use director::Director;
pub use election::{Election, ElectionEntry, ElectionType, EntryType};
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventState, ScheduledEvent};
