//! # Configuration
//!
//! Client and server settings. Every field has a default; a JSON file may override any
//! subset of them, and `DRIFT_*` environment variables override the file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::error::Error;
use crate::error::Result;

/// How a client picks among the endpoints offering a service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    ConsistentHash,
    Lru,
    Lfu,
}

impl std::str::FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" => Ok(Self::RoundRobin),
            "consistent-hash" => Ok(Self::ConsistentHash),
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            other => Err(Error::Config(format!("unknown strategy '{}'", other))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RoundRobin => "round-robin",
            Self::ConsistentHash => "consistent-hash",
            Self::Lru => "lru",
            Self::Lfu => "lfu",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Concurrent connection attempts.
    pub connect_pool_size: usize,
    /// Worker threads of the client's I/O runtime.
    pub io_threads: usize,
    pub strategy: Strategy,
    /// How long routing waits for a first live connection.
    pub wait_timeout_ms: u64,
    /// Calls slower than this are logged at warn.
    pub slow_call_threshold_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_pool_size: 4,
            io_threads: 4,
            strategy: Strategy::RoundRobin,
            wait_timeout_ms: 5000,
            slow_call_threshold_ms: 5000,
            heartbeat_interval_secs: 30,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&read_config_file(path.as_ref())?)
    }

    /// Applies `DRIFT_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("DRIFT_CONNECT_POOL_SIZE") {
            self.connect_pool_size = parse_var("DRIFT_CONNECT_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("DRIFT_IO_THREADS") {
            self.io_threads = parse_var("DRIFT_IO_THREADS", &v)?;
        }
        if let Some(v) = lookup("DRIFT_STRATEGY") {
            self.strategy = v.parse()?;
        }
        if let Some(v) = lookup("DRIFT_WAIT_TIMEOUT_MS") {
            self.wait_timeout_ms = parse_var("DRIFT_WAIT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("DRIFT_SLOW_CALL_MS") {
            self.slow_call_threshold_ms = parse_var("DRIFT_SLOW_CALL_MS", &v)?;
        }
        if let Some(v) = lookup("DRIFT_HEARTBEAT_SECS") {
            self.heartbeat_interval_secs = parse_var("DRIFT_HEARTBEAT_SECS", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_pool_size == 0 {
            return Err(Error::Config("connect_pool_size must be at least 1".into()));
        }
        if self.io_threads == 0 {
            return Err(Error::Config("io_threads must be at least 1".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(Error::Config("heartbeat_interval_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Host published to the registry. Defaults to the bound address's host.
    pub advertise_host: Option<String>,
    /// Concurrent request executions.
    pub worker_pool_size: usize,
    pub heartbeat_interval_secs: u64,
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:18866".to_string(),
            advertise_host: None,
            worker_pool_size: 16,
            heartbeat_interval_secs: 30,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&read_config_file(path.as_ref())?)
    }

    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("DRIFT_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("DRIFT_ADVERTISE_HOST") {
            self.advertise_host = Some(v.trim().to_string()).filter(|host| !host.is_empty());
        }
        if let Some(v) = lookup("DRIFT_WORKER_POOL_SIZE") {
            self.worker_pool_size = parse_var("DRIFT_WORKER_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("DRIFT_HEARTBEAT_SECS") {
            self.heartbeat_interval_secs = parse_var("DRIFT_HEARTBEAT_SECS", &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(Error::Config("worker_pool_size must be at least 1".into()));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(Error::Config("heartbeat_interval_secs must be at least 1".into()));
        }
        if self.advertise_host.as_deref().is_some_and(|host| host.trim().is_empty()) {
            return Err(Error::Config("advertise_host must not be empty".into()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Reads without traffic for this long close a connection.
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval() * 3
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid {}: '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_pool_size, 4);
        assert_eq!(config.io_threads, 4);
        assert_eq!(config.strategy, Strategy::RoundRobin);
        assert_eq!(config.wait_timeout(), Duration::from_millis(5000));
        assert_eq!(config.slow_call_threshold(), Duration::from_millis(5000));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ClientConfig::from_json_str(r#"{"strategy":"lfu","wait_timeout_ms":250}"#).unwrap();
        assert_eq!(config.strategy, Strategy::Lfu);
        assert_eq!(config.wait_timeout_ms, 250);
        assert_eq!(config.io_threads, 4);

        assert!(ClientConfig::from_json_str(r#"{"strategy":"random"}"#).is_err());
        assert!(ClientConfig::from_json_str(r#"{"io_threads":0}"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::default()
            .apply_env_from(env(&[("DRIFT_STRATEGY", "consistent-hash"), ("DRIFT_IO_THREADS", "2")]))
            .unwrap();
        assert_eq!(config.strategy, Strategy::ConsistentHash);
        assert_eq!(config.io_threads, 2);

        let bad = ClientConfig::default().apply_env_from(env(&[("DRIFT_WAIT_TIMEOUT_MS", "soon")]));
        assert!(matches!(bad, Err(Error::Config(_))));
    }

    #[test]
    fn test_server_config() {
        let config = ServerConfig::default()
            .apply_env_from(env(&[("DRIFT_BIND_ADDR", "0.0.0.0:9000"), ("DRIFT_HEARTBEAT_SECS", "2")]))
            .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.worker_pool_size, 16);
        assert_eq!(config.idle_timeout(), Duration::from_secs(6));
        assert_eq!(config.advertise_host, None);
    }

    #[test]
    fn test_server_advertise_host() {
        let config = ServerConfig::default()
            .apply_env_from(env(&[("DRIFT_ADVERTISE_HOST", " rpc.internal ")]))
            .unwrap();
        assert_eq!(config.advertise_host.as_deref(), Some("rpc.internal"));

        let config = ServerConfig::from_json_str(r#"{"bind_addr":"0.0.0.0:0","advertise_host":"10.1.2.3"}"#).unwrap();
        assert_eq!(config.advertise_host.as_deref(), Some("10.1.2.3"));
        assert!(ServerConfig::from_json_str(r#"{"advertise_host":""}"#).is_err());
    }

    #[test]
    fn test_strategy_names() {
        for s in [Strategy::RoundRobin, Strategy::ConsistentHash, Strategy::Lru, Strategy::Lfu] {
            assert_eq!(s.to_string().parse::<Strategy>().unwrap(), s);
        }
    }
}
