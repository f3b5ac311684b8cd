//! Range event log records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only event on a range's log. `id` is strictly increasing per
/// range (DB sequence), which the event stream relies on for resume points.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub range_id: i64,
    pub job_id: Option<i64>,
    pub level: String,
    pub kind: String,
    pub message: String,
    #[sqlx(rename = "payload_json")]
    #[serde(rename = "payload_json")]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
