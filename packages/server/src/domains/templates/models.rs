//! Template definitions.
//!
//! A template is an immutable (name, version) tuple whose definition blob
//! declares the services, networks, and room options of a range. The worker
//! reads only the fields modeled here; everything else in the blob is
//! carried opaquely.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Network segments a service may attach to.
pub const ALLOWED_NETWORKS: &[&str] = &["redteam", "blueteam", "netbird", "corporate", "guest"];

/// An empty segment name resolves to the default corporate segment.
pub fn normalize_network(network: &str) -> &str {
    if network.is_empty() {
        "corporate"
    } else {
        network
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub version: i32,
    pub display_name: String,
    pub description: String,
    #[sqlx(rename = "definition_json")]
    #[serde(rename = "definition_json")]
    pub definition: serde_json::Value,
    pub quota: i32,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    #[serde(default)]
    pub room: RoomOptions,
    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, rename = "ports")]
    pub exposed_ports: Vec<Port>,
    #[serde(default)]
    pub healthcheck: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Port {
    pub container: u16,
    /// 0 asks the daemon for an ephemeral host port.
    #[serde(default)]
    pub host: u16,
    #[serde(default)]
    pub protocol: String,
}

impl Port {
    /// Lowercased protocol; anything that is not `udp` collapses to `tcp`.
    pub fn normalized_protocol(&self) -> &'static str {
        if self.protocol.trim().eq_ignore_ascii_case("udp") {
            "udp"
        } else {
            "tcp"
        }
    }
}

/// Interactive-session settings for the NEKO rooms a template hosts.
///
/// Zero values mean "unset": empty passwords, zero max_connections, and
/// `None` flags contribute nothing to the synthesized environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomOptions {
    #[serde(default)]
    pub user_pass: String,
    #[serde(default)]
    pub admin_pass: String,
    #[serde(default)]
    pub max_connections: u32,
    #[serde(default)]
    pub control_protection: Option<bool>,
    #[serde(default)]
    pub implicit_control: Option<bool>,
}

impl RoomOptions {
    /// True when any option is set and the room env block should be emitted.
    pub fn is_configured(&self) -> bool {
        !self.user_pass.is_empty()
            || !self.admin_pass.is_empty()
            || self.max_connections > 0
            || self.control_protection.is_some()
            || self.implicit_control.is_some()
    }

    /// Overlay `overrides` on top of self; set fields in the override win.
    pub fn overlaid(&self, overrides: &RoomOptions) -> RoomOptions {
        RoomOptions {
            user_pass: pick_str(&self.user_pass, &overrides.user_pass),
            admin_pass: pick_str(&self.admin_pass, &overrides.admin_pass),
            max_connections: if overrides.max_connections > 0 {
                overrides.max_connections
            } else {
                self.max_connections
            },
            control_protection: overrides.control_protection.or(self.control_protection),
            implicit_control: overrides.implicit_control.or(self.implicit_control),
        }
    }
}

fn pick_str(base: &str, over: &str) -> String {
    if over.is_empty() {
        base.to_string()
    } else {
        over.to_string()
    }
}

/// Validate a raw definition blob before it is accepted into the catalog.
pub fn validate_definition(raw: &serde_json::Value) -> Result<Definition> {
    let def: Definition =
        serde_json::from_value(raw.clone()).map_err(|e| anyhow::anyhow!("invalid json: {e}"))?;
    if def.name.is_empty() {
        bail!("name required");
    }
    if def.services.is_empty() {
        bail!("at least one service required");
    }
    for svc in &def.services {
        if svc.name.is_empty() || svc.image.is_empty() {
            bail!("service name and image are required");
        }
        let segment = normalize_network(&svc.network);
        if !ALLOWED_NETWORKS.contains(&segment) {
            bail!("invalid network (allowed: redteam, blueteam, netbird, corporate, guest)");
        }
        for port in &svc.exposed_ports {
            let proto = port.protocol.trim().to_lowercase();
            if !proto.is_empty() && proto != "tcp" && proto != "udp" {
                bail!("invalid port protocol (allowed: tcp, udp)");
            }
            if port.container == 0 {
                bail!("invalid port mapping");
            }
        }
    }
    validate_room_options(&def.room)?;
    Ok(def)
}

/// Bounds for the user-editable room overlay.
pub fn validate_room_options(room: &RoomOptions) -> Result<()> {
    if room.max_connections > 100 {
        bail!("max_connections must be 100 or fewer");
    }
    Ok(())
}
