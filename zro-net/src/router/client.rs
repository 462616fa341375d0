use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use fnv::FnvHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::msg::{DeregisterForMessage, Envelope, Payload, RegisterForMessage};
use crate::socket::zmq::{readable, try_recv_frames, try_send_frames};
use crate::socket::{pack, unpack_detect, Encoding};
use crate::util::get_address;
use crate::{Context, Error, Result};

use super::{default_port, WILDCARD};

static CLIENT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Message received through the router.
#[derive(Clone, Debug)]
pub struct RouterMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received: DateTime<Local>,
}

impl RouterMessage {
    /// Decodes the payload, detecting its encoding.
    pub fn decode<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(unpack_detect(&self.payload)?.0)
    }
}

/// Function invoked for each message on a registered topic.
pub type Callback = Box<dyn FnMut(&RouterMessage) + Send>;

/// Connection to a [`Router`](super::Router).
///
/// Messages are only delivered for topics the client registered for. A
/// message on a topic without its own callback goes to the `*` callback, if
/// one was registered.
pub struct RouterClient {
    socket: zmq::Socket,
    identity: String,
    address: String,
    encoding: Encoding,
    callbacks: FnvHashMap<String, Option<Callback>>,
    stop: Arc<AtomicBool>,
}

impl RouterClient {
    /// Connects to the router on `host`, at `port` or the current user's
    /// default port, and waits up to `timeout` for the router to answer the
    /// connection probe.
    pub fn connect(ctx: &Context, host: &str, port: Option<u16>, timeout: Duration) -> Result<Self> {
        let identity = default_identity();
        let socket = ctx.socket(zmq::DEALER)?;
        socket.set_identity(identity.as_bytes())?;
        socket.set_probe_router(true)?;
        let address = get_address(host, Some(port.unwrap_or_else(default_port)))?;
        socket.connect(&address)?;

        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if !readable(&socket, left)? {
                return Err(Error::Unreachable(address));
            }
            if let Some(frames) = try_recv_frames(&socket)? {
                if is_probe_echo(&frames) {
                    break;
                }
                return Err(Error::HandshakeFailed(format!("{} frames", frames.len())));
            }
        }
        debug!("{} connected to router at {}", identity, address);

        Ok(Self {
            socket,
            identity,
            address,
            encoding: Encoding::default(),
            callbacks: FnvHashMap::default(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encoding used for payloads written by this client.
    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    /// Asks the router for messages on `topic`. With a callback, messages
    /// on the topic are dispatched to it by [`poll`](Self::poll).
    pub fn register_for_message(&mut self, topic: &str, callback: Option<Callback>) -> Result<()> {
        let msg = RegisterForMessage {
            message_id: topic.to_string(),
        };
        self.send_control(&msg)?;
        self.callbacks.insert(topic.to_string(), callback);
        Ok(())
    }

    pub fn deregister_for_message(&mut self, topic: &str) -> Result<()> {
        let msg = DeregisterForMessage {
            message_id: topic.to_string(),
        };
        self.send_control(&msg)?;
        self.callbacks.remove(topic);
        Ok(())
    }

    /// Topics this client registered for.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.callbacks.keys().map(|t| t.as_str()).collect();
        topics.sort_unstable();
        topics
    }

    fn send_control<P: Payload>(&self, msg: &P) -> Result<()> {
        let envelope = Envelope::from_payload(msg, self.encoding)?;
        self.send(&envelope)
    }

    /// Sends `payload` to every client registered for `topic`.
    pub fn write<S: Serialize>(&self, topic: &str, payload: &S) -> Result<()> {
        self.send(&Envelope::new(topic, pack(payload, self.encoding)?))
    }

    /// Sends already encoded bytes under `topic`.
    pub fn write_raw(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.send(&Envelope::new(topic, payload))
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        if envelope.message_id.is_empty() {
            return Err(Error::MalformedEnvelope("empty topic".to_string()));
        }
        match try_send_frames(&self.socket, &envelope.frames())? {
            true => Ok(()),
            false => Err(Error::WouldBlock),
        }
    }

    /// Waits up to `timeout` for the next message.
    pub fn receive(&self, timeout: Duration) -> Result<Option<RouterMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.try_receive()? {
                return Ok(Some(msg));
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left == Duration::from_millis(0) || !readable(&self.socket, left)? {
                return Ok(None);
            }
        }
    }

    fn try_receive(&self) -> Result<Option<RouterMessage>> {
        while let Some(frames) = try_recv_frames(&self.socket)? {
            // the router answers every reconnect probe
            if is_probe_echo(&frames) {
                continue;
            }
            let envelope = Envelope::from_frames(frames)?;
            return Ok(Some(RouterMessage {
                topic: envelope.message_id,
                payload: envelope.payload,
                received: Local::now(),
            }));
        }
        Ok(None)
    }

    /// Dispatches everything received within `timeout` to the registered
    /// callbacks. Returns the number of messages dispatched.
    pub fn poll(&mut self, timeout: Duration) -> Result<usize> {
        let mut dispatched = 0;
        let mut next = self.receive(timeout)?;
        while let Some(msg) = next {
            if self.dispatch(&msg) {
                dispatched += 1;
            } else {
                debug!("no callback for message on {}", msg.topic);
            }
            next = self.try_receive()?;
        }
        Ok(dispatched)
    }

    fn dispatch(&mut self, msg: &RouterMessage) -> bool {
        let key = match self.callbacks.get(&msg.topic) {
            Some(Some(_)) => msg.topic.as_str(),
            _ => WILDCARD,
        };
        match self.callbacks.get_mut(key) {
            Some(Some(cb)) => {
                cb(msg);
                true
            }
            _ => false,
        }
    }

    /// Flag that stops [`start`](Self::start) once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Dispatches messages until stopped.
    pub fn start(&mut self) -> Result<()> {
        let interval = Duration::from_millis(100);
        while !self.stop.load(Ordering::SeqCst) {
            self.poll(interval)?;
        }
        Ok(())
    }
}

fn is_probe_echo(frames: &[Vec<u8>]) -> bool {
    frames.len() == 1 && frames[0].is_empty()
}

/// Identity unique within the machine: executable name, process id and a
/// per process counter.
fn default_identity() -> String {
    let exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap_or_else(|| "zro".to_string());
    let n = CLIENT_COUNT.fetch_add(1, Ordering::SeqCst);
    format!("{}_{}_{}", exe, std::process::id(), n)
}
