//! # Rainwave Common Library
//!
//! Shared code for the Rainwave scheduling services:
//! - Database initialization, schema and migrations
//! - Per-station settings (configuration provider)
//! - Scheduler event types (ScheduleEvent enum) and EventBus
//! - Configuration loading
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
