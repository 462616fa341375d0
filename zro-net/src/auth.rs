//! Address based access control using the ZeroMQ authentication protocol
//! (ZAP).
//!
//! One handler thread per [`Context`](crate::Context) answers ZAP requests
//! for every socket created from that context. Each server registers its own
//! ZAP domain together with an [`AccessList`]; sockets without a registered
//! domain are let through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use fnv::{FnvHashMap, FnvHashSet};

use crate::socket::zmq::readable;
use crate::Result;

const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";
const ZAP_VERSION: &[u8] = b"1.0";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Allowed and denied peer addresses.
///
/// A non-empty allow list wins: only listed addresses get in. Otherwise
/// everybody except the denied addresses gets in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessList {
    pub allow: FnvHashSet<String>,
    pub deny: FnvHashSet<String>,
}

impl AccessList {
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    pub fn permits(&self, address: &str) -> bool {
        if !self.allow.is_empty() {
            self.allow.contains(address)
        } else {
            !self.deny.contains(address)
        }
    }
}

type Domains = Arc<Mutex<FnvHashMap<String, AccessList>>>;

pub(crate) struct Authenticator {
    domains: Domains,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Authenticator {
    pub fn start(ctx: &zmq::Context) -> Result<Self> {
        let socket = ctx.socket(zmq::REP)?;
        socket.set_linger(0)?;
        socket.bind(ZAP_ENDPOINT)?;
        let domains: Domains = Arc::new(Mutex::new(FnvHashMap::default()));
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let domains = domains.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("zro-zap".to_string())
                .spawn(move || serve(socket, domains, running))?
        };
        debug!("started zap handler");
        Ok(Self {
            domains,
            running,
            handle: Some(handle),
        })
    }

    pub fn set_domain(&self, domain: &str, list: AccessList) {
        let mut domains = self.domains.lock().unwrap_or_else(|e| e.into_inner());
        if list.is_empty() {
            domains.remove(domain);
        } else {
            domains.insert(domain.to_string(), list);
        }
    }

    pub fn remove_domain(&self, domain: &str) {
        self.domains
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(domain);
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("zap handler thread panicked");
            }
        }
    }
}

fn serve(socket: zmq::Socket, domains: Domains, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match readable(&socket, POLL_INTERVAL) {
            Ok(true) => (),
            Ok(false) => continue,
            Err(e) => {
                error!("zap handler poll failed: {}", e);
                break;
            }
        }
        let request = match socket.recv_multipart(0) {
            Ok(frames) => frames,
            Err(e) => {
                error!("zap handler failed receiving: {}", e);
                continue;
            }
        };
        let reply = answer(&request, &domains);
        if let Err(e) = socket.send_multipart(reply, 0) {
            error!("zap handler failed replying: {}", e);
        }
    }
    debug!("zap handler stopped");
}

/// Builds the reply to a single ZAP request.
fn answer(request: &[Vec<u8>], domains: &Domains) -> Vec<Vec<u8>> {
    let request_id = request.get(1).cloned().unwrap_or_default();
    if request.len() < 6 || request[0] != ZAP_VERSION {
        warn!("malformed zap request with {} frames", request.len());
        return reply(request_id, b"400", b"malformed request");
    }
    let domain = String::from_utf8_lossy(&request[2]);
    let address = String::from_utf8_lossy(&request[3]);
    let permitted = domains
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(domain.as_ref())
        .map(|list| list.permits(&address))
        .unwrap_or(true);
    if permitted {
        trace!("zap: {} allowed on {}", address, domain);
        reply(request_id, b"200", b"OK")
    } else {
        info!("zap: {} denied on {}", address, domain);
        reply(request_id, b"400", b"address not allowed")
    }
}

fn reply(request_id: Vec<u8>, status: &[u8], text: &[u8]) -> Vec<Vec<u8>> {
    vec![
        ZAP_VERSION.to_vec(),
        request_id,
        status.to_vec(),
        text.to_vec(),
        Vec::new(),
        Vec::new(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(domain: &str, address: &str) -> Vec<Vec<u8>> {
        vec![
            b"1.0".to_vec(),
            b"7".to_vec(),
            domain.as_bytes().to_vec(),
            address.as_bytes().to_vec(),
            Vec::new(),
            b"NULL".to_vec(),
        ]
    }

    #[test]
    fn allow_list_wins_over_deny_list() {
        let mut list = AccessList::default();
        list.deny.insert("10.0.0.1".to_string());
        assert!(list.permits("10.0.0.2"));
        assert!(!list.permits("10.0.0.1"));
        list.allow.insert("10.0.0.3".to_string());
        assert!(!list.permits("10.0.0.2"));
        assert!(list.permits("10.0.0.3"));
    }

    #[test]
    fn answers_per_domain() {
        let domains: Domains = Arc::new(Mutex::new(FnvHashMap::default()));
        let mut list = AccessList::default();
        list.deny.insert("127.0.0.1".to_string());
        domains.lock().unwrap().insert("dev".to_string(), list);

        let denied = answer(&request("dev", "127.0.0.1"), &domains);
        assert_eq!(denied[1], b"7");
        assert_eq!(denied[2], b"400");
        let other_domain = answer(&request("other", "127.0.0.1"), &domains);
        assert_eq!(other_domain[2], b"200");
        let malformed = answer(&[b"1.0".to_vec()], &domains);
        assert_eq!(malformed[2], b"400");
    }
}
