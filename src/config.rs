use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::parser::MAX_BODY_SIZE;
use crate::server::reactor::ReactorOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub reactor: ReactorConfig,
    pub limits: LimitsConfig,
    pub log_level: String,
    /// Emit one summary line per routed request.
    pub request_log: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub backlog: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    pub heartbeat_ms: u64,
    pub accept_batch: usize,
    pub sweep_every: u64,
    pub max_events: usize,
    pub inactive_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Target for the open-file soft limit.
    pub nofile: u64,
    /// Largest request body, declared or chunked.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            reactor: ReactorConfig::default(),
            limits: LimitsConfig::default(),
            log_level: "info".to_string(),
            request_log: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            backlog: 1024,
        }
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 100,
            accept_batch: 16,
            sweep_every: 10,
            max_events: 1024,
            inactive_timeout_secs: 120,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            nofile: 65536,
            max_body_bytes: MAX_BODY_SIZE,
        }
    }
}

impl Config {
    /// Reads the YAML file named by `EMBER_CONFIG` (defaults when unset),
    /// then applies the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("EMBER_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        if let Ok(addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = addr;
        }
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn reactor_options(&self) -> ReactorOptions {
        ReactorOptions {
            heartbeat: Duration::from_millis(self.reactor.heartbeat_ms.max(1)),
            accept_batch: self.reactor.accept_batch.max(1),
            sweep_every: self.reactor.sweep_every.max(1),
            max_events: self.reactor.max_events.max(1),
            inactive_timeout: Duration::from_secs(self.reactor.inactive_timeout_secs),
            max_body: self.limits.max_body_bytes,
        }
    }
}
