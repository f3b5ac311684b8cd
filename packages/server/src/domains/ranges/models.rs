//! Range records and their published-ports metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a range. Only the worker moves a range between states;
/// `Failed` is terminal until a later destroy/reset job re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeStatus {
    Pending,
    Provisioning,
    Ready,
    Destroying,
    Destroyed,
    Failed,
}

impl RangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeStatus::Pending => "pending",
            RangeStatus::Provisioning => "provisioning",
            RangeStatus::Ready => "ready",
            RangeStatus::Destroying => "destroying",
            RangeStatus::Destroyed => "destroyed",
            RangeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RangeStatus::Pending),
            "provisioning" => Ok(RangeStatus::Provisioning),
            "ready" => Ok(RangeStatus::Ready),
            "destroying" => Ok(RangeStatus::Destroying),
            "destroyed" => Ok(RangeStatus::Destroyed),
            "failed" => Ok(RangeStatus::Failed),
            other => Err(anyhow::anyhow!("unknown range status {other}")),
        }
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Range {
    pub id: i64,
    pub team_id: i64,
    pub template_id: i64,
    pub owner_user_id: i64,
    pub name: String,
    pub status: String,
    #[sqlx(rename = "metadata_json")]
    #[serde(rename = "metadata_json")]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One live daemon resource backing a range service.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct RangeResource {
    pub resource_type: String,
    pub docker_id: String,
    pub service_name: String,
    #[sqlx(rename = "metadata_json")]
    #[serde(rename = "metadata_json")]
    pub metadata: serde_json::Value,
}

/// User-editable room overlay for one (range, service) pair.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct RoomInstance {
    pub range_id: i64,
    pub team_id: i64,
    pub service_name: String,
    pub status: String,
    pub entry_path: String,
    #[sqlx(rename = "settings_json")]
    #[serde(rename = "settings_json")]
    pub settings: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// One host-side binding of a published container port, in the daemon's own
/// JSON casing so the metadata blob round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort", default)]
    pub host_port: String,
}

/// `"80/tcp" -> bindings`, as captured from container inspect.
pub type PortMap = BTreeMap<String, Vec<HostBinding>>;

/// Range metadata written by the worker and read by the proxy and the
/// access-link builder: `{"ports": {"<service>": {"80/tcp": [...]}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeMetadata {
    #[serde(default)]
    pub ports: BTreeMap<String, PortMap>,
}

impl RangeMetadata {
    /// Lenient parse; malformed metadata reads as "no ports published".
    pub fn parse(raw: &serde_json::Value) -> Self {
        serde_json::from_value(raw.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_round_trips() {
        for s in [
            "pending",
            "provisioning",
            "ready",
            "destroying",
            "destroyed",
            "failed",
        ] {
            assert_eq!(s.parse::<RangeStatus>().unwrap().as_str(), s);
        }
        assert!("gone".parse::<RangeStatus>().is_err());
    }

    #[test]
    fn metadata_parses_daemon_casing() {
        let raw = json!({
            "ports": {"web": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "32768"}]}}
        });
        let meta = RangeMetadata::parse(&raw);
        assert_eq!(meta.ports["web"]["80/tcp"][0].host_port, "32768");
    }

    #[test]
    fn metadata_tolerates_garbage() {
        let meta = RangeMetadata::parse(&json!("not an object"));
        assert!(meta.ports.is_empty());
    }
}
