//! Relay and bot settings, loaded from a TOML file and the environment.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use osrs_net::server::{DEFAULT_FIRST_CLIENT_ID, DEFAULT_PORT};
use osrs_net::{ClientConfig, ServerConfig, DEFAULT_MAX_MESSAGE_SIZE};
use serde::Deserialize;
use tracing::warn;

/// File: ~/.config/osrs/relay.toml or /etc/osrs/relay.toml (first one present wins).
/// Env overrides: OSRS_HOST, OSRS_PORT, OSRS_FIRST_CLIENT_ID, OSRS_MAX_MESSAGE_SIZE, OSRS_TICK_MS.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server bind address; also the address the bot connects to.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_first_client_id")]
    pub first_client_id: u32,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u32,
    /// Bot update period in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_first_client_id() -> u32 {
    DEFAULT_FIRST_CLIENT_ID
}
fn default_max_message_size() -> u32 {
    DEFAULT_MAX_MESSAGE_SIZE
}
fn default_tick_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            first_client_id: default_first_client_id(),
            max_message_size: default_max_message_size(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Config {
    /// Listener settings. A host that is not an IP literal binds every interface.
    pub fn server_config(&self) -> ServerConfig {
        let bind_addr = self
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        ServerConfig {
            bind_addr,
            port: self.port,
            first_client_id: self.first_client_id,
            max_message_size: self.max_message_size,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            max_message_size: self.max_message_size,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    /// Apply overrides from `var`. Unparsable values are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(h) = var("OSRS_HOST") {
            if !h.is_empty() {
                self.host = h;
            }
        }
        if let Some(p) = var("OSRS_PORT").and_then(|s| s.parse().ok()) {
            self.port = p;
        }
        if let Some(id) = var("OSRS_FIRST_CLIENT_ID").and_then(|s| s.parse().ok()) {
            self.first_client_id = id;
        }
        if let Some(max) = var("OSRS_MAX_MESSAGE_SIZE").and_then(|s| s.parse().ok()) {
            self.max_message_size = max;
        }
        if let Some(ms) = var("OSRS_TICK_MS").and_then(|s| s.parse().ok()) {
            self.tick_ms = ms;
        }
    }
}

/// Load config: defaults, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|key| std::env::var(key).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/osrs/relay.toml"));
    }
    out.push(PathBuf::from("/etc/osrs/relay.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    read_file(&path)
}

fn read_file(path: &Path) -> Option<Config> {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!("cannot read {}: {}", path.display(), e);
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("ignoring {}: {}", path.display(), e);
            None
        }
    }
}
