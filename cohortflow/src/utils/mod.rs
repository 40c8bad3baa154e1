//! Utility functions for id generation and timestamp handling.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an RFC 3339 string with microseconds.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Generates a new time-ordered id.
///
/// Jobs and runs use v7 ids so that ids sort roughly by submission time.
#[must_use]
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}
