//! NEKO environment synthesis.
//!
//! Services hosting interactive rooms are configured entirely through
//! `NEKO_*` variables. The room options contribute a base block, then the
//! service's own env list overlays it, last write wins by key.

use crate::domains::templates::{RoomOptions, Service};

/// Environment for one service container: room-derived base merged with the
/// service's explicit env entries.
pub fn build_service_env(room: &RoomOptions, service: &Service) -> Vec<String> {
    let mut base = Vec::new();
    if room.is_configured() {
        base.push("NEKO_MEMBER_PROVIDER=multiuser".to_string());
        base.push("NEKO_WEBRTC_ICELITE=1".to_string());
        base.push("NEKO_WEBRTC_EPR=52000-52000".to_string());
        if !room.user_pass.is_empty() {
            base.push(format!("NEKO_MEMBER_MULTIUSER_USER_PASSWORD={}", room.user_pass));
        }
        if !room.admin_pass.is_empty() {
            base.push(format!("NEKO_MEMBER_MULTIUSER_ADMIN_PASSWORD={}", room.admin_pass));
        }
        if room.max_connections > 0 {
            base.push(format!("NEKO_SERVER_CONCURRENCY={}", room.max_connections));
        }
        if let Some(protected) = room.control_protection {
            base.push(format!("NEKO_CONTROL_PROTECTION={protected}"));
        }
        if let Some(implicit) = room.implicit_control {
            base.push(format!("NEKO_IMPLICIT_CONTROL={implicit}"));
        }
    }
    merge_env(&base, &service.env)
}

/// Merge `KEY=VALUE` lists: overrides replace base entries in place by key,
/// new keys append, first-occurrence order is preserved.
pub fn merge_env(base: &[String], overrides: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(base.len() + overrides.len());
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for kv in base.iter().chain(overrides.iter()) {
        let key = match kv.find('=') {
            Some(pos) if pos > 0 => &kv[..pos],
            _ => kv.as_str(),
        };
        match index.get(key) {
            Some(&pos) => out[pos] = kv.clone(),
            None => {
                index.insert(key.to_string(), out.len());
                out.push(kv.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_map(entries: &[String]) -> std::collections::HashMap<String, String> {
        entries
            .iter()
            .map(|kv| match kv.find('=') {
                Some(pos) => (kv[..pos].to_string(), kv[pos + 1..].to_string()),
                None => (kv.clone(), String::new()),
            })
            .collect()
    }

    #[test]
    fn room_options_drive_base_env() {
        let room = RoomOptions {
            user_pass: "u1".into(),
            admin_pass: "a1".into(),
            max_connections: 7,
            control_protection: Some(true),
            implicit_control: None,
        };
        let service = Service {
            env: vec![
                "NEKO_MEMBER_MULTIUSER_USER_PASSWORD=override".into(),
                "CUSTOM=1".into(),
            ],
            ..Default::default()
        };

        let merged = env_map(&build_service_env(&room, &service));
        assert_eq!(merged["NEKO_MEMBER_PROVIDER"], "multiuser");
        assert_eq!(merged["NEKO_MEMBER_MULTIUSER_USER_PASSWORD"], "override");
        assert_eq!(merged["NEKO_MEMBER_MULTIUSER_ADMIN_PASSWORD"], "a1");
        assert_eq!(merged["NEKO_SERVER_CONCURRENCY"], "7");
        assert_eq!(merged["NEKO_CONTROL_PROTECTION"], "true");
        assert_eq!(merged["CUSTOM"], "1");
        assert!(!merged.contains_key("NEKO_IMPLICIT_CONTROL"));
    }

    #[test]
    fn unconfigured_room_contributes_nothing() {
        let service = Service {
            env: vec!["ONLY=me".into()],
            ..Default::default()
        };
        let env = build_service_env(&RoomOptions::default(), &service);
        assert_eq!(env, vec!["ONLY=me".to_string()]);
    }

    #[test]
    fn merge_last_wins_by_key_keeps_order() {
        let merged = merge_env(
            &["A=1".into(), "B=1".into()],
            &["B=2".into(), "C=3".into()],
        );
        assert_eq!(merged, vec!["A=1".to_string(), "B=2".into(), "C=3".into()]);
    }

    #[test]
    fn merge_handles_valueless_entries() {
        let merged = merge_env(&["FLAG".into()], &["FLAG".into(), "A=1".into()]);
        assert_eq!(merged, vec!["FLAG".to_string(), "A=1".into()]);
    }
}
