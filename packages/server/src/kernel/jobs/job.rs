//! Job records for the durable work queue.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Work the reconciliation worker knows how to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Provision,
    Destroy,
    Reset,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Provision => "provision",
            JobType::Destroy => "destroy",
            JobType::Reset => "reset",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provision" => Ok(JobType::Provision),
            "destroy" => Ok(JobType::Destroy),
            "reset" => Ok(JobType::Reset),
            other => Err(anyhow::anyhow!("unsupported job type {other}")),
        }
    }
}

/// Full queue row, as returned to API callers. Status stays the raw column
/// value: `queued -> running` happens only through the claim query,
/// `running -> queued` only through the reaper, `succeeded` and `failed`
/// are terminal.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub range_id: i64,
    pub team_id: i64,
    pub job_type: String,
    pub status: String,
    #[sqlx(rename = "payload_json")]
    #[serde(rename = "payload_json")]
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The slice of a job the worker needs after a successful claim.
#[derive(FromRow, Debug, Clone)]
pub struct ClaimedJob {
    pub id: i64,
    pub range_id: i64,
    pub team_id: i64,
    pub job_type: String,
    #[sqlx(rename = "payload_json")]
    pub payload: serde_json::Value,
    pub attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips() {
        for t in ["provision", "destroy", "reset"] {
            assert_eq!(t.parse::<JobType>().unwrap().as_str(), t);
        }
        let err = "compact".parse::<JobType>().unwrap_err();
        assert!(err.to_string().contains("unsupported job type"));
    }
}
