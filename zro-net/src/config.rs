//! Configuration structs.
//!
//! Every construct takes its own config struct. All of them can also be
//! read from a single TOML file, with one optional table per construct:
//!
//! ```toml
//! [server]
//! ip = "*"
//! rep_port = 5556
//! update_interval_ms = 1000
//!
//! [publisher]
//! hwm = 10
//! encoding = "json"
//!
//! [router]
//! port = 7000
//! ```

use std::path::Path;
use std::time::Duration;

use crate::socket::Encoding;
use crate::Result;

/// Remote object server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind the reply socket on, `*` for all.
    pub ip: String,
    /// Reply port, ephemeral if not set.
    pub rep_port: Option<u16>,
    /// Interval between update hook calls, 0 disables them.
    pub update_interval_ms: u64,
    /// Upper bound on a single reactor poll.
    pub poll_timeout_ms: u64,
    /// Number of worker threads running async calls. With 0 async calls
    /// run on the reactor itself.
    pub async_workers: usize,
    /// Include the panic location in `CallRaised` messages.
    pub full_traceback: bool,
    /// Timeout for delivering async results to registered callbacks.
    pub callback_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "*".to_string(),
            rep_port: None,
            update_interval_ms: 0,
            poll_timeout_ms: 10,
            async_workers: 0,
            full_traceback: false,
            callback_timeout_ms: 3000,
        }
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            rep_port: Some(port),
            ..Default::default()
        }
    }

    pub fn update_interval(&self) -> Option<Duration> {
        match self.update_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Publish socket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub ip: String,
    pub pub_port: Option<u16>,
    /// Outbound queue depth, messages past it are dropped.
    pub hwm: i32,
    pub encoding: Encoding,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            ip: "*".to_string(),
            pub_port: None,
            hwm: 10,
            encoding: Encoding::MsgPack,
        }
    }
}

/// Push/pull socket settings for producers, consumers and sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ip: String,
    /// Producer push port, ephemeral if not set.
    pub push_port: Option<u16>,
    /// Sink pull port, ephemeral if not set.
    pub pull_port: Option<u16>,
    pub encoding: Encoding,
    /// Timeout for the producer's calls to its sink.
    pub sink_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ip: "*".to_string(),
            push_port: None,
            pull_port: None,
            encoding: Encoding::MsgPack,
            sink_timeout_ms: 3000,
        }
    }
}

/// Device proxy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub timeout_ms: u64,
    pub encoding: Encoding,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            encoding: Encoding::MsgPack,
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Router settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub ip: String,
    /// Port to bind, derived from the user name if not set. 0 picks any
    /// free port.
    pub port: Option<u16>,
    pub poll_timeout_ms: u64,
    /// Number of recent `(sender, topic)` pairs kept for inspection.
    pub header_retention: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ip: "*".to_string(),
            port: None,
            poll_timeout_ms: 100,
            header_retention: 100,
        }
    }
}

/// Heartbeat settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Host of the router receiving the heartbeats.
    pub router_host: String,
    /// Router port, derived from the user name if not set.
    pub router_port: Option<u16>,
    pub topic: String,
    /// Zero turns the heartbeat off.
    pub interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            router_host: "127.0.0.1".to_string(),
            router_port: None,
            topic: "generic_heartbeat".to_string(),
            interval_ms: 1000,
            connect_timeout_ms: 2000,
        }
    }
}

/// All settings, as read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub publisher: PublisherConfig,
    pub pipeline: PipelineConfig,
    pub proxy: ProxyConfig,
    pub router: RouterConfig,
    pub heartbeat: HeartbeatConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
