//! Topic based message broker.
//!
//! Clients connect to a single ROUTER socket. A client registers for a topic
//! with a `register_for_message` message and from then on receives every
//! message sent under that topic by other clients. Clients registered for
//! the `*` topic receive every message.
//!
//! Each message is delivered at most once per recipient, even when the
//! recipient is registered both for the topic and for `*`, and never back to
//! its sender. Registration messages themselves are not forwarded.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fnv::FnvHashMap;

use crate::config::RouterConfig;
use crate::msg::{
    DeregisterForMessage, Envelope, RegisterForMessage, DEREGISTER_FOR_MESSAGE,
    REGISTER_FOR_MESSAGE,
};
use crate::socket::zmq::{readable, rebind, try_recv_frames};
use crate::util::{current_username, port_for_user};
use crate::{Context, Result};

pub mod client;

pub use client::{RouterClient, RouterMessage};

/// Topic matching every message.
pub const WILDCARD: &str = "*";

/// Identity of the router socket itself.
pub const ROUTER_IDENTITY: &[u8] = b"router";

/// Port the router binds by default, derived from the current user name.
pub fn default_port() -> u16 {
    port_for_user(&current_username())
}

pub struct Router {
    socket: zmq::Socket,
    port: u16,
    config: RouterConfig,
    clients: BTreeSet<Vec<u8>>,
    registrations: FnvHashMap<String, Vec<Vec<u8>>>,
    recent: VecDeque<(Vec<u8>, String)>,
    forwarded: u64,
    shutdown: Arc<AtomicBool>,
}

impl Router {
    pub fn new(ctx: &Context, config: RouterConfig) -> Result<Self> {
        let socket = ctx.socket(zmq::ROUTER)?;
        socket.set_identity(ROUTER_IDENTITY)?;
        socket.set_router_mandatory(true)?;
        // port 0 asks for any free port
        let port = match config.port {
            Some(0) => None,
            Some(port) => Some(port),
            None => Some(default_port()),
        };
        let port = rebind(&socket, &config.ip, port)?;
        info!("router bound on tcp://{}:{}", config.ip, port);
        Ok(Self {
            socket,
            port,
            config,
            clients: BTreeSet::new(),
            registrations: FnvHashMap::default(),
            recent: VecDeque::new(),
            forwarded: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Flag that stops [`run_forever`](Self::run_forever) once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn run_forever(&mut self) -> Result<()> {
        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        while !self.shutdown.load(Ordering::SeqCst) {
            self.poll_once(timeout)?;
        }
        info!("router on port {} stopped", self.port);
        Ok(())
    }

    /// Handles everything waiting on the socket, waiting at most `timeout`
    /// for the first message. Returns the number of frame sets handled.
    pub fn poll_once(&mut self, timeout: Duration) -> Result<usize> {
        if !readable(&self.socket, timeout)? {
            return Ok(0);
        }
        let mut handled = 0;
        while let Some(frames) = try_recv_frames(&self.socket)? {
            self.handle(frames);
            handled += 1;
        }
        Ok(handled)
    }

    fn handle(&mut self, frames: Vec<Vec<u8>>) {
        let envelope = match Envelope::from_routed_frames(frames) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping malformed frames: {}", e);
                return;
            }
        };
        let client = match &envelope.routing_id {
            Some(id) => id.clone(),
            None => return,
        };
        if envelope.is_handshake() {
            info!("new connection from {}", String::from_utf8_lossy(&client));
            self.clients.insert(client.clone());
            self.send(&client, &[&client, b""]);
            return;
        }
        self.clients.insert(client.clone());
        debug!(
            "{} -> {}",
            String::from_utf8_lossy(&client),
            envelope.message_id
        );
        self.remember(&client, &envelope.message_id);

        match envelope.message_id.as_str() {
            REGISTER_FOR_MESSAGE => match envelope.unpack_payload::<RegisterForMessage>() {
                Ok((msg, _)) => self.register(&client, &msg.message_id),
                Err(e) => warn!("bad registration: {}", e),
            },
            DEREGISTER_FOR_MESSAGE => match envelope.unpack_payload::<DeregisterForMessage>() {
                Ok((msg, _)) => self.deregister(&client, &msg.message_id),
                Err(e) => warn!("bad deregistration: {}", e),
            },
            _ => self.forward(&client, &envelope),
        }
    }

    fn remember(&mut self, client: &[u8], topic: &str) {
        if self.config.header_retention == 0 {
            return;
        }
        while self.recent.len() >= self.config.header_retention {
            self.recent.pop_front();
        }
        self.recent.push_back((client.to_vec(), topic.to_string()));
    }

    /// Adds `client` to the recipients of `topic`. Registering twice has no
    /// further effect.
    pub fn register(&mut self, client: &[u8], topic: &str) {
        let registered = self.registrations.entry(topic.to_string()).or_default();
        if !registered.iter().any(|c| c.as_slice() == client) {
            registered.push(client.to_vec());
            info!(
                "{} registered for {}",
                String::from_utf8_lossy(client),
                topic
            );
        }
    }

    /// Removes `client` from the recipients of `topic`, if it was there.
    pub fn deregister(&mut self, client: &[u8], topic: &str) {
        if let Some(registered) = self.registrations.get_mut(topic) {
            let before = registered.len();
            registered.retain(|c| c.as_slice() != client);
            if registered.len() != before {
                info!(
                    "{} deregistered from {}",
                    String::from_utf8_lossy(client),
                    topic
                );
            }
        }
    }

    /// Recipients of a message on `topic` sent by `sender`: wildcard
    /// registrants first, then topic registrants, each once, sender
    /// excluded.
    pub fn recipients(&self, sender: &[u8], topic: &str) -> Vec<Vec<u8>> {
        let mut recipients: Vec<Vec<u8>> = Vec::new();
        let wildcard = self.registrations.get(WILDCARD).into_iter().flatten();
        let specific = self.registrations.get(topic).into_iter().flatten();
        for client in wildcard.chain(specific) {
            if client.as_slice() != sender && !recipients.contains(client) {
                recipients.push(client.clone());
            }
        }
        recipients
    }

    fn forward(&mut self, sender: &[u8], envelope: &Envelope) {
        for recipient in self.recipients(sender, &envelope.message_id) {
            let frames: [&[u8]; 3] = [
                &recipient,
                envelope.message_id.as_bytes(),
                &envelope.payload,
            ];
            if self.send(&recipient, &frames) {
                self.forwarded += 1;
                trace!(
                    "{} <- {}",
                    String::from_utf8_lossy(&recipient),
                    envelope.message_id
                );
            }
        }
    }

    /// Sends without blocking, logging failures. A stale identity or a full
    /// queue never stops the router.
    fn send(&self, recipient: &[u8], frames: &[&[u8]]) -> bool {
        match self.socket.send_multipart(frames.iter().copied(), zmq::DONTWAIT) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "failed delivering to {}: {}",
                    String::from_utf8_lossy(recipient),
                    e
                );
                false
            }
        }
    }

    /// Identities seen so far. Clients are never forgotten.
    pub fn known_clients(&self) -> Vec<String> {
        self.clients
            .iter()
            .map(|c| String::from_utf8_lossy(c).to_string())
            .collect()
    }

    pub fn registrations(&self, topic: &str) -> Vec<String> {
        self.registrations
            .get(topic)
            .map(|clients| {
                clients
                    .iter()
                    .map(|c| String::from_utf8_lossy(c).to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Most recent `(sender, topic)` pairs, oldest first.
    pub fn recent_headers(&self) -> Vec<(String, String)> {
        self.recent
            .iter()
            .map(|(c, t)| (String::from_utf8_lossy(c).to_string(), t.clone()))
            .collect()
    }

    /// Number of deliveries made.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        let config = RouterConfig {
            ip: "127.0.0.1".to_string(),
            port: Some(0),
            header_retention: 3,
            ..Default::default()
        };
        Router::new(&Context::new(), config).unwrap()
    }

    #[test]
    fn recipients_are_deduplicated() {
        let mut r = router();
        r.register(b"a", "T");
        r.register(b"a", "T");
        r.register(b"b", "T");
        r.register(b"b", WILDCARD);
        r.register(b"c", WILDCARD);
        r.register(b"d", "T");
        assert_eq!(r.registrations("T"), vec!["a", "b", "d"]);
        assert_eq!(
            r.recipients(b"d", "T"),
            vec![b"b".to_vec(), b"c".to_vec(), b"a".to_vec()]
        );
        assert_eq!(r.recipients(b"a", "other"), vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn deregistration_is_per_topic_and_idempotent() {
        let mut r = router();
        r.register(b"a", "T");
        r.register(b"a", "U");
        r.deregister(b"a", "T");
        r.deregister(b"a", "T");
        r.deregister(b"zz", "nope");
        assert!(r.registrations("T").is_empty());
        assert_eq!(r.registrations("U"), vec!["a"]);
    }

    #[test]
    fn header_ring_is_bounded() {
        let mut r = router();
        for topic in &["1", "2", "3", "4"] {
            r.remember(b"x", topic);
        }
        let topics: Vec<String> = r.recent_headers().into_iter().map(|(_, t)| t).collect();
        assert_eq!(topics, vec!["2", "3", "4"]);
    }
}
