//! Client configuration loaded from environment variables.
//!
//! All settings have defaults pointing at a local development backend.

use std::path::PathBuf;
use std::time::Duration;

use platesync_shared::constants::{
    DEFAULT_API_URL, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_RECONNECT_MAX_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_WS_PATH,
};

/// How the like count is settled once the backend confirms a like toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LikeCountPolicy {
    /// Keep the locally computed count; only the server's `liked` flag is
    /// applied. The current backend reports per-actor counts on this route.
    #[default]
    PreserveLocal,
    /// Apply the server's count when the response carries one.
    TrustServer,
}

impl LikeCountPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve-local" | "preserve_local" | "local" => Some(Self::PreserveLocal),
            "trust-server" | "trust_server" | "server" => Some(Self::TrustServer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL.
    /// Env: `PLATESYNC_API_URL`
    /// Default: `http://127.0.0.1:3000/api`
    pub api_url: String,

    /// WebSocket endpoint.
    /// Env: `PLATESYNC_WS_URL`
    /// Default: derived from the API URL's origin (`ws://127.0.0.1:3000/ws`)
    pub ws_url: String,

    /// Per-request HTTP timeout.
    /// Env: `PLATESYNC_REQUEST_TIMEOUT_SECS`
    /// Default: 15 s
    pub request_timeout: Duration,

    /// Where the session database and avatar cache live.
    /// Env: `PLATESYNC_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Capacity of the inbound realtime queue.
    /// Env: `PLATESYNC_EVENT_QUEUE`
    /// Default: 256
    pub event_queue_capacity: usize,

    /// Cap on the realtime reconnect delay.
    /// Env: `PLATESYNC_RECONNECT_MAX_SECS`
    /// Default: 30 s
    pub reconnect_max: Duration,

    /// Env: `PLATESYNC_LIKE_COUNT_POLICY` (`preserve-local` / `trust-server`)
    pub like_count_policy: LikeCountPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: derive_ws_url(DEFAULT_API_URL),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            data_dir: None,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            reconnect_max: Duration::from_secs(DEFAULT_RECONNECT_MAX_SECS),
            like_count_policy: LikeCountPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(var: F) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("PLATESYNC_API_URL").filter(|v| !v.trim().is_empty()) {
            config.ws_url = derive_ws_url(&url);
            config.api_url = url;
        }

        if let Some(url) = var("PLATESYNC_WS_URL").filter(|v| !v.trim().is_empty()) {
            config.ws_url = url;
        }

        if let Some(val) = var("PLATESYNC_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid PLATESYNC_REQUEST_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(dir) = var("PLATESYNC_DATA_DIR").filter(|v| !v.is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(val) = var("PLATESYNC_EVENT_QUEUE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.event_queue_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid PLATESYNC_EVENT_QUEUE, using default"),
            }
        }

        if let Some(val) = var("PLATESYNC_RECONNECT_MAX_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.reconnect_max = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %val, "Invalid PLATESYNC_RECONNECT_MAX_SECS, using default"),
            }
        }

        if let Some(val) = var("PLATESYNC_LIKE_COUNT_POLICY") {
            match LikeCountPolicy::parse(&val) {
                Some(policy) => config.like_count_policy = policy,
                None => tracing::warn!(value = %val, "Invalid PLATESYNC_LIKE_COUNT_POLICY, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

/// `http(s)://host[:port]/anything` becomes `ws(s)://host[:port]/ws`.
fn derive_ws_url(api_url: &str) -> String {
    let (scheme, rest) = match api_url.split_once("://") {
        Some(("https", rest)) => ("wss", rest),
        Some((_, rest)) => ("ws", rest),
        None => ("ws", api_url),
    };
    let origin = rest.split('/').next().unwrap_or(rest);
    format!("{scheme}://{origin}{DEFAULT_WS_PATH}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ClientConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_url, "http://127.0.0.1:3000/api");
        assert_eq!(config.ws_url, "ws://127.0.0.1:3000/ws");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.like_count_policy, LikeCountPolicy::PreserveLocal);
    }

    #[test]
    fn test_ws_url_follows_api_url() {
        let config = load(&[("PLATESYNC_API_URL", "https://plates.example.com/api/v1")]);
        assert_eq!(config.ws_url, "wss://plates.example.com/ws");

        let config = load(&[
            ("PLATESYNC_API_URL", "https://plates.example.com/api"),
            ("PLATESYNC_WS_URL", "wss://rt.example.com/socket"),
        ]);
        assert_eq!(config.ws_url, "wss://rt.example.com/socket");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[
            ("PLATESYNC_REQUEST_TIMEOUT_SECS", "soon"),
            ("PLATESYNC_EVENT_QUEUE", "0"),
            ("PLATESYNC_LIKE_COUNT_POLICY", "trust-server"),
        ]);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.event_queue_capacity, 256);
        assert_eq!(config.like_count_policy, LikeCountPolicy::TrustServer);
    }
}
