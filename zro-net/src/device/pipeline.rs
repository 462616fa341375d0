//! Work pipeline: a producer pushes work to any number of consumers, which
//! push their results to a sink.
//!
//! Work travels as `work` envelopes carrying `{work, id}`, results as
//! `result` envelopes carrying `{data, id}`. The sink tags every result with
//! a key made of the current batch name, the id and the arrival time. Batches
//! are bookkeeping only, nothing is held back or rolled back.

use std::any::Any;
use std::time::Duration;

use chrono::Local;

use zro_core::{to_value, Call, CallError, Value};

use super::Role;
use crate::config::PipelineConfig;
use crate::msg::{Envelope, ResultPacket, WorkPacket};
use crate::socket::zmq::{rebind, release, swap_bound, try_recv_frames, try_send_frames};
use crate::socket::Encoding;
use crate::util::get_address;
use crate::{Context, DeviceProxy, Error, ProxyConfig, Result};

/// Batch name used outside of any started batch.
pub const DEFAULT_BATCH: &str = "0";

/// Consumer hook turning work into a result.
pub trait Processes {
    fn process(&mut self, work: Value) -> std::result::Result<Value, CallError> {
        Ok(work)
    }
}

/// Sink hook receiving tagged results.
pub trait Collects {
    fn handle_data(&mut self, key: &str, data: Value);

    fn batch_started(&mut self, _name: &str) {}

    fn batch_ended(&mut self, _name: &str) {}
}

fn send_envelope(socket: &zmq::Socket, envelope: &Envelope) -> Result<bool> {
    try_send_frames(socket, &envelope.frames())
}

/// Role adding a bound PUSH socket for distributing work.
pub struct Producer {
    ctx: Context,
    socket: Option<zmq::Socket>,
    config: PipelineConfig,
    port: u16,
    sink: Option<DeviceProxy>,
    pushed: u64,
}

impl Producer {
    pub fn new(ctx: &Context, config: PipelineConfig) -> Result<Self> {
        let socket = ctx.socket(zmq::PUSH)?;
        let port = rebind(&socket, &config.ip, config.push_port)?;
        info!("pushing on port {}", port);
        Ok(Self {
            ctx: ctx.clone(),
            socket: Some(socket),
            config,
            port,
            sink: None,
            pushed: 0,
        })
    }

    /// Moves the push socket, keeping the old one if the new endpoint
    /// can't be bound.
    pub fn set_push_ip(&mut self, ip: &str, port: Option<u16>) -> Result<u16> {
        let fresh = self.ctx.socket(zmq::PUSH)?;
        let current = self.socket.as_mut().ok_or(Error::Closed)?;
        self.port = swap_bound(current, self.port, fresh, ip, port)?;
        self.config.ip = ip.to_string();
        self.config.push_port = port;
        info!("pushing on port {}", self.port);
        Ok(self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Connects to the sink device answering on `ip:rep_port`, used for
    /// batch bookkeeping.
    pub fn set_sink(&mut self, ip: &str, rep_port: u16) -> Result<()> {
        let config = ProxyConfig {
            timeout_ms: self.config.sink_timeout_ms,
            encoding: self.config.encoding,
        };
        let address = get_address(ip, Some(rep_port))?;
        self.sink = Some(DeviceProxy::with_config(&self.ctx, &address, config)?);
        info!("using sink at {}", address);
        Ok(())
    }

    /// Sends a unit of work to the next ready consumer.
    ///
    /// Fails with `WouldBlock` if no consumer is connected or all of them
    /// are saturated.
    pub fn push(&mut self, work: Value, id: Value) -> Result<()> {
        let envelope = Envelope::from_payload(&WorkPacket { work, id }, self.config.encoding)?;
        let socket = self.socket.as_ref().ok_or(Error::Closed)?;
        if send_envelope(socket, &envelope)? {
            self.pushed += 1;
            trace!("pushed work {}", self.pushed);
            Ok(())
        } else {
            Err(Error::WouldBlock)
        }
    }

    pub fn start_batch(&mut self, name: &str) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::NoSink)?;
        sink.call("start_batch", vec![Value::from(name)])?;
        Ok(())
    }

    pub fn end_batch(&mut self) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::NoSink)?;
        sink.call("end_batch", vec![])?;
        Ok(())
    }
}

impl<T: Send + 'static> Role<T> for Producer {
    fn name(&self) -> &'static str {
        "producer"
    }

    fn commands(&self) -> &'static [&'static str] {
        &["end_batch", "push", "set_sink", "start_batch"]
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["push_port"]
    }

    fn get(&self, name: &str) -> std::result::Result<Value, CallError> {
        match name {
            "push_port" => to_value(self.port),
            _ => Err(CallError::raised(format!("no producer attribute {}", name))),
        }
    }

    fn run(
        &mut self,
        _target: &mut T,
        name: &str,
        call: &Call,
    ) -> std::result::Result<Value, CallError> {
        match name {
            "push" => {
                let work: Value = call.arg(0, "work")?;
                let id: Value = call.arg_or(1, "id", Value::Null)?;
                self.push(work, id)?;
            }
            "set_sink" => {
                let ip: String = call.arg(0, "ip")?;
                let port: u16 = call.arg(1, "rep_port")?;
                self.set_sink(&ip, port)?;
            }
            "start_batch" => {
                let batch: String = call.arg_or(0, "name", String::new())?;
                self.start_batch(&batch)?;
            }
            "end_batch" => self.end_batch()?,
            _ => return Err(CallError::raised(format!("no producer method {}", name))),
        }
        Ok(Value::Null)
    }

    fn close(&mut self) {
        self.sink = None;
        if let Some(socket) = self.socket.take() {
            release(socket, Duration::ZERO);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Role pulling work from a producer, running it through the target, and
/// pushing results to a sink.
pub struct Consumer {
    ctx: Context,
    encoding: Encoding,
    source: Option<(String, zmq::Socket)>,
    sink: Option<(String, zmq::Socket)>,
    processed: u64,
}

impl Consumer {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            encoding: Encoding::default(),
            source: None,
            sink: None,
            processed: 0,
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Pulls work from the producer pushing on `ip:port`.
    pub fn set_source(&mut self, ip: &str, port: u16) -> Result<()> {
        let address = get_address(ip, Some(port))?;
        let socket = self.ctx.socket(zmq::PULL)?;
        socket.connect(&address)?;
        info!("collecting work from {}", address);
        self.source = Some((address, socket));
        Ok(())
    }

    /// Pushes results to the sink pulling on `ip:port`.
    pub fn set_sink(&mut self, ip: &str, port: u16) -> Result<()> {
        let address = get_address(ip, Some(port))?;
        let socket = self.ctx.socket(zmq::PUSH)?;
        socket.connect(&address)?;
        info!("pushing results to {}", address);
        self.sink = Some((address, socket));
        Ok(())
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn drain<T: Processes>(&mut self, target: &mut T) -> Result<usize> {
        let source = match &self.source {
            Some((_, socket)) => socket,
            None => return Ok(0),
        };
        let mut handled = 0;
        while let Some(frames) = try_recv_frames(source)? {
            handled += 1;
            let packet = Envelope::from_frames(frames)
                .and_then(|env| env.unpack_payload::<WorkPacket>());
            let (packet, _) = match packet {
                Ok(p) => p,
                Err(e) => {
                    warn!("dropping malformed work: {}", e);
                    continue;
                }
            };
            debug!("new work arrived, id: {}", packet.id);
            let data = match target.process(packet.work) {
                Ok(data) => data,
                Err(e) => {
                    warn!("processing work {} failed: {}", packet.id, e);
                    continue;
                }
            };
            self.processed += 1;
            match &self.sink {
                Some((address, socket)) => {
                    let result = ResultPacket {
                        data,
                        id: packet.id,
                    };
                    let envelope = Envelope::from_payload(&result, self.encoding)?;
                    if !send_envelope(socket, &envelope)? {
                        warn!("sink at {} not ready, result {} dropped", address, result.id);
                    }
                }
                None => warn!("work {} processed but no sink is set", packet.id),
            }
        }
        Ok(handled)
    }
}

impl<T: Processes + Send + 'static> Role<T> for Consumer {
    fn name(&self) -> &'static str {
        "consumer"
    }

    fn commands(&self) -> &'static [&'static str] {
        &["set_sink", "set_source"]
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["sink", "source"]
    }

    fn get(&self, name: &str) -> std::result::Result<Value, CallError> {
        let endpoint = match name {
            "sink" => &self.sink,
            "source" => &self.source,
            _ => return Err(CallError::raised(format!("no consumer attribute {}", name))),
        };
        to_value(endpoint.as_ref().map(|(address, _)| address))
    }

    fn run(
        &mut self,
        _target: &mut T,
        name: &str,
        call: &Call,
    ) -> std::result::Result<Value, CallError> {
        let ip: String = call.arg(0, "ip")?;
        let port: u16 = call.arg(1, "port")?;
        match name {
            "set_source" => self.set_source(&ip, port)?,
            "set_sink" => self.set_sink(&ip, port)?,
            _ => return Err(CallError::raised(format!("no consumer method {}", name))),
        }
        Ok(Value::Null)
    }

    fn service(&mut self, target: &mut T) -> Result<usize> {
        self.drain(target)
    }

    fn close(&mut self) {
        self.source = None;
        self.sink = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Role adding a bound PULL socket collecting results.
pub struct Sink {
    ctx: Context,
    socket: Option<zmq::Socket>,
    ip: String,
    port: u16,
    batch: String,
    collected: u64,
}

impl Sink {
    pub fn new(ctx: &Context, config: &PipelineConfig) -> Result<Self> {
        let socket = ctx.socket(zmq::PULL)?;
        let port = rebind(&socket, &config.ip, config.pull_port)?;
        info!("collecting on port {}", port);
        Ok(Self {
            ctx: ctx.clone(),
            socket: Some(socket),
            ip: config.ip.clone(),
            port,
            batch: DEFAULT_BATCH.to_string(),
            collected: 0,
        })
    }

    pub fn set_pull_ip(&mut self, ip: &str, port: Option<u16>) -> Result<u16> {
        let fresh = self.ctx.socket(zmq::PULL)?;
        let current = self.socket.as_mut().ok_or(Error::Closed)?;
        self.port = swap_bound(current, self.port, fresh, ip, port)?;
        self.ip = ip.to_string();
        info!("collecting on port {}", self.port);
        Ok(self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn batch(&self) -> &str {
        &self.batch
    }

    pub fn collected(&self) -> u64 {
        self.collected
    }

    pub fn start_batch<T: Collects>(&mut self, target: &mut T, name: &str) {
        self.batch = name.to_string();
        info!("batch {} started", self.batch);
        target.batch_started(&self.batch);
    }

    pub fn end_batch<T: Collects>(&mut self, target: &mut T) {
        info!("batch {} ended", self.batch);
        target.batch_ended(&self.batch);
        self.batch = DEFAULT_BATCH.to_string();
    }

    /// Key identifying one result: `{batch}_{id}_{timestamp}`.
    pub fn data_key(&self, id: &Value) -> String {
        let id = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let stamp = Local::now().format("%y%m%d%H%M%S%6f");
        format!("{}_{}_{}", self.batch, id, stamp)
    }

    pub fn drain<T: Collects>(&mut self, target: &mut T) -> Result<usize> {
        let socket = match &self.socket {
            Some(socket) => socket,
            None => return Ok(0),
        };
        let mut handled = 0;
        while let Some(frames) = try_recv_frames(socket)? {
            let packet = Envelope::from_frames(frames)
                .and_then(|env| env.unpack_payload::<ResultPacket>());
            match packet {
                Ok((packet, _)) => {
                    let key = self.data_key(&packet.id);
                    target.handle_data(&key, packet.data);
                    debug!("data {} handled", key);
                    handled += 1;
                }
                Err(e) => warn!("dropping malformed result: {}", e),
            }
        }
        self.collected += handled as u64;
        Ok(handled)
    }
}

impl<T: Collects + Send + 'static> Role<T> for Sink {
    fn name(&self) -> &'static str {
        "sink"
    }

    fn commands(&self) -> &'static [&'static str] {
        &["end_batch", "start_batch"]
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["batch", "pull_port"]
    }

    fn get(&self, name: &str) -> std::result::Result<Value, CallError> {
        match name {
            "batch" => to_value(&self.batch),
            "pull_port" => to_value(self.port),
            _ => Err(CallError::raised(format!("no sink attribute {}", name))),
        }
    }

    fn run(
        &mut self,
        target: &mut T,
        name: &str,
        call: &Call,
    ) -> std::result::Result<Value, CallError> {
        match name {
            "start_batch" => {
                let batch: String = call.arg_or(0, "name", DEFAULT_BATCH.to_string())?;
                self.start_batch(target, &batch);
            }
            "end_batch" => self.end_batch(target),
            _ => return Err(CallError::raised(format!("no sink method {}", name))),
        }
        Ok(Value::Null)
    }

    fn service(&mut self, target: &mut T) -> Result<usize> {
        self.drain(target)
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            release(socket, Duration::ZERO);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_keys() {
        let ctx = Context::new();
        let mut config = PipelineConfig::default();
        config.ip = "127.0.0.1".to_string();
        let sink = Sink::new(&ctx, &config).unwrap();
        let key = sink.data_key(&json!("frame7"));
        assert!(key.starts_with("0_frame7_"));
        // %y%m%d%H%M%S plus six digits of microseconds
        assert_eq!(key.len(), "0_frame7_".len() + 18);
        assert!(sink.data_key(&json!(3)).starts_with("0_3_"));
    }

    #[test]
    fn producer_without_consumers_would_block() {
        let ctx = Context::new();
        let mut config = PipelineConfig::default();
        config.ip = "127.0.0.1".to_string();
        let mut producer = Producer::new(&ctx, config).unwrap();
        assert!(matches!(
            producer.push(json!(1), json!("a")),
            Err(Error::WouldBlock)
        ));
        assert!(matches!(producer.start_batch("b"), Err(Error::NoSink)));
    }

    struct Collector(Vec<String>);
    impl Collects for Collector {
        fn handle_data(&mut self, key: &str, _data: Value) {
            self.0.push(key.to_string());
        }
    }

    #[test]
    fn closed_pipeline_ends_free_their_ports() {
        let ctx = Context::new();
        let mut config = PipelineConfig::default();
        config.ip = "127.0.0.1".to_string();
        let mut producer = Producer::new(&ctx, config.clone()).unwrap();
        let mut sink = Sink::new(&ctx, &config).unwrap();
        let (push_port, pull_port) = (producer.port(), sink.port());

        <Producer as Role<Collector>>::close(&mut producer);
        <Sink as Role<Collector>>::close(&mut sink);
        assert!(matches!(producer.push(json!(1), json!("a")), Err(Error::Closed)));
        assert_eq!(sink.drain(&mut Collector(Vec::new())).unwrap(), 0);

        config.push_port = Some(push_port);
        config.pull_port = Some(pull_port);
        assert_eq!(Producer::new(&ctx, config.clone()).unwrap().port(), push_port);
        assert_eq!(Sink::new(&ctx, &config).unwrap().port(), pull_port);
    }

    #[test]
    fn sink_keeps_its_port_when_the_move_fails() {
        let ctx = Context::new();
        let mut config = PipelineConfig::default();
        config.ip = "127.0.0.1".to_string();
        let mut sink = Sink::new(&ctx, &config).unwrap();
        let other = Sink::new(&ctx, &config).unwrap();
        let port = sink.port();
        assert!(sink.set_pull_ip("127.0.0.1", Some(other.port())).is_err());
        assert_eq!(sink.port(), port);

        let moved = sink.set_pull_ip("127.0.0.1", None).unwrap();
        assert_ne!(moved, port);
        assert_eq!(sink.port(), moved);
    }
}
