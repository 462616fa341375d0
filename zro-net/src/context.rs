use std::sync::{Arc, Mutex};

use crate::auth::{AccessList, Authenticator};
use crate::Result;

/// Transport context shared by all the sockets of a process.
///
/// Cloning is cheap, clones refer to the same underlying ZeroMQ context.
/// The context is torn down once the last clone, and the last socket made
/// from it, are dropped.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    // dropped before `zmq` so the handler thread exits first
    auth: Mutex<Option<Authenticator>>,
    zmq: zmq::Context,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Context")
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                auth: Mutex::new(None),
                zmq: zmq::Context::new(),
            }),
        }
    }

    /// Creates a new socket of the given type.
    pub fn socket(&self, type_: zmq::SocketType) -> Result<zmq::Socket> {
        let socket = self.inner.zmq.socket(type_)?;
        socket.set_linger(0)?;
        Ok(socket)
    }

    pub fn zmq(&self) -> &zmq::Context {
        &self.inner.zmq
    }

    /// Installs the access list for a ZAP domain, starting the handler on
    /// first use.
    pub(crate) fn set_access(&self, domain: &str, list: AccessList) -> Result<()> {
        let mut auth = self.inner.auth.lock().unwrap_or_else(|e| e.into_inner());
        if auth.is_none() {
            *auth = Some(Authenticator::start(&self.inner.zmq)?);
        }
        if let Some(auth) = auth.as_ref() {
            auth.set_domain(domain, list);
        }
        Ok(())
    }

    pub(crate) fn clear_access(&self, domain: &str) {
        let auth = self.inner.auth.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(auth) = auth.as_ref() {
            auth.remove_domain(domain);
        }
    }
}
