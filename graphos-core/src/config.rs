use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level graphos configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphosConfig {
    pub global: GlobalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OtelConfig {
    pub service_name: Option<String>,
    pub otlp_endpoint: Option<String>,
}

/// Protocol server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Shared secret expected in `X-GraphOS-Auth: Bearer <secret>`.
    #[serde(default)]
    pub rpc_secret: Option<String>,
    #[serde(default = "default_session_idle_timeout", with = "humantime_duration")]
    pub session_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enabled: default_enabled(),
            server_name: default_server_name(),
            rpc_secret: None,
            session_idle_timeout: default_session_idle_timeout(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:4000".into()
}

fn default_enabled() -> bool {
    true
}

fn default_server_name() -> String {
    "graphos".into()
}

fn default_session_idle_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Runner pool and supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Bounded wait for a synchronous execution.
    #[serde(default = "default_execution_timeout", with = "humantime_duration")]
    pub execution_timeout: Duration,
    #[serde(default = "default_script_timeout", with = "humantime_duration")]
    pub script_timeout: Duration,
    /// Crash intensity: more than `max_restarts` crashes within
    /// `restart_window` marks the supervisor degraded.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_window", with = "humantime_duration")]
    pub restart_window: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            execution_timeout: default_execution_timeout(),
            script_timeout: default_script_timeout(),
            max_restarts: default_max_restarts(),
            restart_window: default_restart_window(),
        }
    }
}

fn default_execution_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_script_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_restarts() -> u32 {
    5
}

fn default_restart_window() -> Duration {
    Duration::from_secs(60)
}

/// Scopes an actor may act within. Patterns are exact ids, `prefix*`, or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantConfig {
    pub actor: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Serde helper for human-readable durations like "500ms", "30s", "10m".
pub mod humantime_duration {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        let secs = duration.as_secs();
        if millis % 1000 != 0 {
            serializer.serialize_str(&format!("{millis}ms"))
        } else if secs % 3600 == 0 && secs >= 3600 {
            serializer.serialize_str(&format!("{}h", secs / 3600))
        } else if secs % 60 == 0 && secs >= 60 {
            serializer.serialize_str(&format!("{}m", secs / 60))
        } else {
            serializer.serialize_str(&format!("{secs}s"))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {s}")))
    }

    pub fn parse_duration(s: &str) -> Option<Duration> {
        let s = s.trim();
        if let Some(n) = s.strip_suffix("ms") {
            n.parse::<u64>().ok().map(Duration::from_millis)
        } else if let Some(n) = s.strip_suffix('s') {
            n.parse::<u64>().ok().map(Duration::from_secs)
        } else if let Some(n) = s.strip_suffix('m') {
            n.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
        } else if let Some(n) = s.strip_suffix('h') {
            n.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().ok().map(Duration::from_secs)
        }
    }
}
