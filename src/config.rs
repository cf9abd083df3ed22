use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOGIN_HOST: &str = "https://login.weixin.qq.com";
pub const DEFAULT_APP_ID: &str = "wx782c26e4c19acffb";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_2) AppleWebKit/602.3.12 (KHTML, like Gecko) Version/10.0.2 Safari/602.3.12";

/// Tunables for a [`crate::Client`]. Every field has a working default, so
/// most callers only override `storage_dir`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Directory holding the cookie, base-info and contact caches.
    pub storage_dir: PathBuf,
    pub login_host: String,
    pub app_id: String,
    pub lang: String,
    pub user_agent: String,

    /// Timeout for every call except the long-poll check.
    pub request_timeout: Duration,
    /// Timeout for the sync-check long poll. The server holds the request
    /// for roughly 25 seconds when nothing is pending.
    pub sync_check_timeout: Duration,
    /// Optional client-side pause between two sync checks.
    pub sync_min_interval: Duration,

    pub backoff_initial: Duration,
    pub backoff_max: Duration,

    /// Upper bound on poll-confirm round trips for a single challenge.
    pub confirm_poll_limit: Option<u32>,

    /// Explicit sync-check hosts. Empty means derive them from the base URL.
    pub sync_hosts: Vec<String>,
    /// Consecutive transport failures tolerated on one sync host before
    /// moving to the next.
    pub host_failure_threshold: u32,

    pub event_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".webot"),
            login_host: DEFAULT_LOGIN_HOST.to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
            lang: "zh_CN".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(60),
            sync_check_timeout: Duration::from_secs(35),
            sync_min_interval: Duration::ZERO,
            backoff_initial: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            confirm_poll_limit: Some(30),
            sync_hosts: Vec::new(),
            host_failure_threshold: 2,
            event_queue_capacity: 64,
        }
    }
}

impl ClientConfig {
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_login_host(mut self, host: impl Into<String>) -> Self {
        self.login_host = host.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_sync_hosts(mut self, hosts: Vec<String>) -> Self {
        self.sync_hosts = hosts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }

    pub fn with_confirm_poll_limit(mut self, limit: Option<u32>) -> Self {
        self.confirm_poll_limit = limit;
        self
    }

    /// Loads a config from a JSON document; missing fields keep their defaults.
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ClientConfig::from_json(br#"{"storage_dir": "/tmp/bot", "lang": "en_US"}"#)
            .expect("config should parse");
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/bot"));
        assert_eq!(config.lang, "en_US");
        assert_eq!(config.login_host, DEFAULT_LOGIN_HOST);
        assert_eq!(config.host_failure_threshold, 2);
    }

    #[test]
    fn login_host_is_normalised() {
        let config = ClientConfig::default().with_login_host("https://example.test/");
        assert_eq!(config.login_host, "https://example.test");
    }
}
