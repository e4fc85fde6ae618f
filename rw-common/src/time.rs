//! Timestamp utilities
//!
//! All persisted scheduling timestamps are integer Unix seconds.

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as Unix seconds
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}
