//! Periodic liveness messages sent through a router.

use std::any::Any;
use std::time::{Duration, Instant};

use chrono::Local;

use zro_core::{to_value, Call, CallError, Value};

use super::Role;
use crate::config::HeartbeatConfig;
use crate::{Context, Error, Result, RouterClient};

/// Payload written on the heartbeat topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Router identity of the sending device.
    pub sender: String,
    pub process: String,
    pub pid: u32,
    /// Seconds since the epoch.
    pub timestamp: f64,
    /// Heartbeats sent before this one.
    pub beat: u64,
}

/// Role announcing the device on a router topic at a fixed interval.
///
/// Beats go out from the reactor's service cycle, so the interval is only
/// as precise as the server's poll timeout.
pub struct Heartbeat {
    client: Option<RouterClient>,
    config: HeartbeatConfig,
    process: String,
    last_beat: Option<Instant>,
    beats: u64,
}

impl Heartbeat {
    /// Connects to the router named in `config`.
    pub fn new(ctx: &Context, config: HeartbeatConfig) -> Result<Self> {
        let client = RouterClient::connect(
            ctx,
            &config.router_host,
            config.router_port,
            Duration::from_millis(config.connect_timeout_ms),
        )?;
        info!(
            "sending heartbeats on {} to {} every {} ms",
            config.topic,
            client.address(),
            config.interval_ms
        );
        let process = std::env::args().next().unwrap_or_default();
        Ok(Self {
            client: Some(client),
            config,
            process,
            last_beat: None,
            beats: 0,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.config.interval_ms)
    }

    /// Zero stops the heartbeat.
    pub fn set_interval(&mut self, interval: Duration) {
        self.config.interval_ms = interval.as_millis() as u64;
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn beats(&self) -> u64 {
        self.beats
    }

    fn due(&self) -> bool {
        if self.config.interval_ms == 0 {
            return false;
        }
        match self.last_beat {
            Some(last) => last.elapsed() >= self.interval(),
            None => true,
        }
    }

    /// Sends one heartbeat right away.
    pub fn beat(&mut self) -> Result<()> {
        let client = self.client.as_ref().ok_or(Error::Closed)?;
        let message = HeartbeatMessage {
            sender: client.identity().to_string(),
            process: self.process.clone(),
            pid: std::process::id(),
            timestamp: Local::now().timestamp_millis() as f64 / 1000.0,
            beat: self.beats,
        };
        self.last_beat = Some(Instant::now());
        match client.write(&self.config.topic, &message) {
            Ok(()) => {
                self.beats += 1;
                trace!("heartbeat {} sent", self.beats);
                Ok(())
            }
            Err(Error::WouldBlock) => {
                warn!("router at {} not ready, heartbeat dropped", client.address());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<T: Send + 'static> Role<T> for Heartbeat {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn commands(&self) -> &'static [&'static str] {
        &["send_heartbeat"]
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["heartbeat_interval", "heartbeat_topic", "heartbeats"]
    }

    fn writable(&self) -> &'static [&'static str] {
        &["heartbeat_interval"]
    }

    fn get(&self, name: &str) -> std::result::Result<Value, CallError> {
        match name {
            "heartbeat_interval" => to_value(self.config.interval_ms),
            "heartbeat_topic" => to_value(&self.config.topic),
            "heartbeats" => to_value(self.beats),
            _ => Err(CallError::raised(format!("no heartbeat attribute {}", name))),
        }
    }

    fn set(&mut self, name: &str, value: Value) -> std::result::Result<(), CallError> {
        match name {
            "heartbeat_interval" => {
                let ms: u64 = serde_json::from_value(value)?;
                self.set_interval(Duration::from_millis(ms));
                Ok(())
            }
            _ => Err(CallError::raised(format!("can't set {}", name))),
        }
    }

    fn run(
        &mut self,
        _target: &mut T,
        name: &str,
        _call: &Call,
    ) -> std::result::Result<Value, CallError> {
        match name {
            "send_heartbeat" => {
                self.beat()?;
                to_value(self.beats)
            }
            _ => Err(CallError::raised(format!("no heartbeat method {}", name))),
        }
    }

    fn service(&mut self, _target: &mut T) -> Result<usize> {
        if !self.due() {
            return Ok(0);
        }
        self.beat()?;
        Ok(1)
    }

    fn close(&mut self) {
        self.client = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
