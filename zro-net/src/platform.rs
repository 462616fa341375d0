//! Platform information reported by every server.

use chrono::{DateTime, Local, SecondsFormat};

/// Fixed record describing the host and the serving process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Version of this library.
    pub zro: String,
    /// Version of the linked libzmq.
    pub zmq: String,
    /// `debug` or `release`.
    pub build: String,
    pub os: String,
    pub os_family: String,
    pub arch: String,
    pub pid: u32,
    /// Process start time, RFC 3339.
    pub start_time: String,
}

impl PlatformInfo {
    pub fn collect(start_time: &DateTime<Local>) -> Self {
        let (major, minor, patch) = zmq::version();
        Self {
            zro: zro_core::VERSION.to_string(),
            zmq: format!("{}.{}.{}", major, minor, patch),
            build: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "release".to_string()
            },
            os: std::env::consts::OS.to_string(),
            os_family: std::env::consts::FAMILY.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            pid: std::process::id(),
            start_time: start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
