use std::collections::HashSet;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_addr: String,
    pub worker_id: String,
    pub docker_host: Option<String>,
    pub session_key: String,
    pub admin_emails: HashSet<String>,
    pub dev_auth_email: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_redirect_url: Option<String>,
    /// How long the queue sleeps between empty claim polls.
    pub job_poll_interval: Duration,
    /// Age after which a `running` job with no terminal status is considered
    /// abandoned and handed back to the queue.
    pub stale_job_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let admin_emails = env::var("ADMIN_EMAILS")
            .unwrap_or_default()
            .split(',')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            http_addr: env_or("HTTP_ADDR", ":8080"),
            worker_id: env::var("WORKER_ID")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| format!("provisioner-{}", uuid::Uuid::new_v4())),
            docker_host: non_empty(env::var("DOCKER_HOST").ok()),
            session_key: env_or("SESSION_KEY", "dev-session-key-change-me"),
            admin_emails,
            dev_auth_email: non_empty(env::var("DEV_AUTH_EMAIL").ok()),
            google_client_id: non_empty(env::var("GOOGLE_CLIENT_ID").ok()),
            google_client_secret: non_empty(env::var("GOOGLE_CLIENT_SECRET").ok()),
            google_redirect_url: non_empty(env::var("GOOGLE_REDIRECT_URL").ok()),
            job_poll_interval: duration_secs_or("JOB_POLL_INTERVAL_SECS", 1)?,
            stale_job_timeout: duration_secs_or("STALE_JOB_TIMEOUT_SECS", 600)?,
        })
    }

    /// The HTTP bind address in `host:port` form. `HTTP_ADDR` accepts the
    /// bare `:8080` shorthand, which binds all interfaces.
    pub fn bind_addr(&self) -> String {
        if self.http_addr.starts_with(':') {
            format!("0.0.0.0{}", self.http_addr)
        } else {
            self.http_addr.clone()
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn duration_secs_or(key: &str, default: u64) -> Result<Duration> {
    match env::var(key) {
        Ok(v) => {
            let secs: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds", key))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_expands_bare_port() {
        let mut cfg = test_config();
        cfg.http_addr = ":9090".into();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9090");

        cfg.http_addr = "127.0.0.1:8080".into();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
    }

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".into(),
            http_addr: ":8080".into(),
            worker_id: "provisioner-test".into(),
            docker_host: None,
            session_key: "k".into(),
            admin_emails: HashSet::new(),
            dev_auth_email: None,
            google_client_id: None,
            google_client_secret: None,
            google_redirect_url: None,
            job_poll_interval: Duration::from_secs(1),
            stale_job_timeout: Duration::from_secs(600),
        }
    }
}
