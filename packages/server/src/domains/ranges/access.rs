//! Access-link construction for provisioned services.
//!
//! The worker records each service's live port map in the range metadata;
//! this module turns that into per-service entry URLs and resolves which
//! host actually answers on a published port.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;

use crate::domains::templates::{Definition, RoomOptions};

use super::models::{PortMap, RangeMetadata, RoomInstance};

const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Serialize)]
pub struct AccessLink {
    pub service_name: String,
    pub url: String,
}

/// The host port to proxy a service on: `8080/tcp`, then `80/tcp`, then
/// `443/tcp`, then the lexicographically smallest `/tcp` key. Empty when the
/// service published nothing usable.
pub fn preferred_host_port(ports: &PortMap) -> String {
    for key in ["8080/tcp", "80/tcp", "443/tcp"] {
        if let Some(port) = first_bound_port(ports, key) {
            return port;
        }
    }
    // PortMap is ordered, so this scans /tcp keys smallest-first.
    for key in ports.keys() {
        if key.to_lowercase().ends_with("/tcp") {
            if let Some(port) = first_bound_port(ports, key) {
                return port;
            }
        }
    }
    String::new()
}

fn first_bound_port(ports: &PortMap, key: &str) -> Option<String> {
    let binding = ports.get(key)?.first()?;
    let host_port = binding.host_port.trim();
    if host_port.is_empty() {
        None
    } else {
        Some(host_port.to_string())
    }
}

/// Slugified viewer name carried in access links: spaces become dashes,
/// anything outside `[A-Za-z0-9._-]` is dropped, empty falls back to guest.
pub fn viewer_name_hint(raw: &str) -> String {
    let slug: String = raw
        .trim()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if slug.is_empty() {
        "guest".to_string()
    } else {
        slug
    }
}

/// Build one access link per service with a usable published port. The room
/// password prefers the per-service instance override, then the template's
/// room options.
pub fn build_access_links(
    range_id: i64,
    metadata: &serde_json::Value,
    template_definition: &serde_json::Value,
    rooms: &[RoomInstance],
    viewer_hint: &str,
) -> Vec<AccessLink> {
    let meta = RangeMetadata::parse(metadata);
    if meta.ports.is_empty() {
        return Vec::new();
    }

    let template_room = serde_json::from_value::<Definition>(template_definition.clone())
        .map(|def| def.room)
        .unwrap_or_default();
    let overrides: HashMap<&str, RoomOptions> = rooms
        .iter()
        .map(|room| {
            (
                room.service_name.as_str(),
                serde_json::from_value(room.settings.clone()).unwrap_or_default(),
            )
        })
        .collect();

    let usr = viewer_name_hint(viewer_hint);
    let mut links = Vec::new();
    for (service, ports) in &meta.ports {
        if preferred_host_port(ports).is_empty() {
            continue;
        }
        let room = match overrides.get(service.as_str()) {
            Some(over) => template_room.overlaid(over),
            None => template_room.clone(),
        };
        let mut url = format!(
            "/api/ranges/{}/access/{}/?usr={}",
            range_id,
            urlencoding::encode(service),
            urlencoding::encode(&usr)
        );
        let pwd = room.user_pass.trim();
        if !pwd.is_empty() {
            url.push_str("&pwd=");
            url.push_str(&urlencoding::encode(pwd));
        }
        links.push(AccessLink {
            service_name: service.clone(),
            url,
        });
    }
    links
}

/// Probe which host candidate actually answers on a published port. Ranges
/// run next to either the API process or a sibling container, so try the
/// daemon gateway alias first, then loopback.
pub async fn first_reachable_host(port: &str) -> String {
    for host in ["host.docker.internal", "127.0.0.1", "localhost"] {
        let addr = format!("{host}:{port}");
        if let Ok(Ok(conn)) = tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&addr)).await {
            drop(conn);
            return host.to_string();
        }
    }
    "localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::ranges::models::HostBinding;
    use chrono::Utc;
    use serde_json::json;

    fn bound(port: &str) -> Vec<HostBinding> {
        vec![HostBinding {
            host_ip: "0.0.0.0".into(),
            host_port: port.into(),
        }]
    }

    #[test]
    fn preferred_port_order() {
        let mut ports = PortMap::new();
        ports.insert("443/tcp".into(), bound("31443"));
        ports.insert("9000/tcp".into(), bound("39000"));
        assert_eq!(preferred_host_port(&ports), "31443");

        ports.insert("80/tcp".into(), bound("31080"));
        assert_eq!(preferred_host_port(&ports), "31080");

        ports.insert("8080/tcp".into(), bound("38080"));
        assert_eq!(preferred_host_port(&ports), "38080");
    }

    #[test]
    fn preferred_port_falls_back_to_smallest_tcp_key() {
        let mut ports = PortMap::new();
        ports.insert("9090/tcp".into(), bound("39090"));
        ports.insert("52000/udp".into(), bound("52000"));
        ports.insert("1234/tcp".into(), bound("31234"));
        assert_eq!(preferred_host_port(&ports), "31234");
    }

    #[test]
    fn preferred_port_skips_empty_bindings() {
        let mut ports = PortMap::new();
        ports.insert("8080/tcp".into(), bound(""));
        ports.insert("80/tcp".into(), bound("31080"));
        assert_eq!(preferred_host_port(&ports), "31080");

        let mut udp_only = PortMap::new();
        udp_only.insert("52000/udp".into(), bound("52000"));
        assert_eq!(preferred_host_port(&udp_only), "");
    }

    #[test]
    fn viewer_hint_slugs() {
        assert_eq!(viewer_name_hint("Ada Lovelace"), "Ada-Lovelace");
        assert_eq!(viewer_name_hint("  "), "guest");
        assert_eq!(viewer_name_hint("a!b@c.d"), "abc.d");
    }

    #[test]
    fn links_prefer_room_instance_password() {
        let metadata = json!({
            "ports": {"web": {"8080/tcp": [{"HostIp": "0.0.0.0", "HostPort": "38080"}]}}
        });
        let template = json!({
            "name": "lab",
            "room": {"user_pass": "neko"},
            "services": [{"name": "web", "image": "img"}]
        });
        let rooms = vec![RoomInstance {
            range_id: 7,
            team_id: 1,
            service_name: "web".into(),
            status: "running".into(),
            entry_path: String::new(),
            settings: json!({"user_pass": "pw2"}),
            updated_at: Utc::now(),
        }];

        let links = build_access_links(7, &metadata, &template, &rooms, "Ada L");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].service_name, "web");
        assert_eq!(links[0].url, "/api/ranges/7/access/web/?usr=Ada-L&pwd=pw2");
    }

    #[test]
    fn links_skip_services_without_host_ports() {
        let metadata = json!({
            "ports": {"web": {"52000/udp": [{"HostIp": "0.0.0.0", "HostPort": "52000"}]}}
        });
        let links = build_access_links(1, &metadata, &json!({}), &[], "x");
        assert!(links.is_empty());
    }
}
