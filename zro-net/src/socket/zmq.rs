//! Thin helpers over `rust-zmq` sockets shared by all the constructs in
//! this crate.

use std::time::Duration;

use crate::util::{get_address, has_port};
use crate::{Error, Result};

/// Binds `socket` on `ip`, either at `port` or at an ephemeral port picked
/// by the OS. Returns the port actually bound.
pub fn bind(socket: &zmq::Socket, ip: &str, port: Option<u16>) -> Result<u16> {
    let ip = if ip.is_empty() { "*" } else { ip };
    let endpoint = match port {
        Some(port) => get_address(ip, Some(port))?,
        None if has_port(ip) => get_address(ip, None)?,
        None => format!("{}:*", get_address(ip, None)?),
    };
    socket.bind(&endpoint)?;
    let port = bound_port(socket)?;
    debug!("bound socket at {} (port {})", endpoint, port);
    Ok(port)
}

/// Binds like [`bind`], retrying for a short while if the port is still
/// held by a socket that was just closed.
pub fn rebind(socket: &zmq::Socket, ip: &str, port: Option<u16>) -> Result<u16> {
    let mut attempts = 0;
    loop {
        match bind(socket, ip, port) {
            Err(Error::ZmqError(zmq::Error::EADDRINUSE)) if attempts < REBIND_ATTEMPTS => {
                attempts += 1;
                std::thread::sleep(REBIND_BACKOFF);
            }
            result => return result,
        }
    }
}

const REBIND_ATTEMPTS: u32 = 25;
const REBIND_BACKOFF: Duration = Duration::from_millis(20);

/// Moves a bound endpoint over to `fresh`, which replaces `current`.
///
/// The fresh socket is bound before the current one is dropped, so a failed
/// bind leaves the device reachable where it was. Asking for the port
/// `current` already holds unbinds it first, and binds it back if the fresh
/// socket can't take it over.
pub fn swap_bound(
    current: &mut zmq::Socket,
    current_port: u16,
    fresh: zmq::Socket,
    ip: &str,
    port: Option<u16>,
) -> Result<u16> {
    if port != Some(current_port) {
        let bound = rebind(&fresh, ip, port)?;
        *current = fresh;
        return Ok(bound);
    }
    let endpoint = last_endpoint(current)?;
    current.unbind(&endpoint)?;
    match rebind(&fresh, ip, port) {
        Ok(bound) => {
            *current = fresh;
            Ok(bound)
        }
        Err(e) => {
            if let Err(restore) = rebind(current, &endpoint, None) {
                error!("failed restoring {}: {}", endpoint, restore);
            }
            Err(e)
        }
    }
}

/// Lets go of the socket's bound endpoint, flushing pending messages for at
/// most `linger`, and drops it.
pub fn release(socket: zmq::Socket, linger: Duration) {
    if let Err(e) = socket.set_linger(timeout_ms(linger)) {
        warn!("failed setting linger before close: {}", e);
    }
    match last_endpoint(&socket) {
        Ok(endpoint) if !endpoint.is_empty() => {
            if let Err(e) = socket.unbind(&endpoint) {
                debug!("unbinding {} failed: {}", endpoint, e);
            }
        }
        _ => (),
    }
}

/// Last endpoint the socket was bound or connected to.
pub fn last_endpoint(socket: &zmq::Socket) -> Result<String> {
    Ok(match socket.get_last_endpoint()? {
        Ok(e) => e,
        Err(bytes) => String::from_utf8_lossy(&bytes).to_string(),
    })
}

/// Port of the last endpoint the socket was bound to.
pub fn bound_port(socket: &zmq::Socket) -> Result<u16> {
    let endpoint = last_endpoint(socket)?;
    let port = endpoint
        .rsplit(':')
        .next()
        .ok_or_else(|| Error::Other(format!("no port in endpoint: {}", endpoint)))?;
    Ok(port.parse()?)
}

/// Returns true if the socket has a message waiting after at most
/// `timeout`.
pub fn readable(socket: &zmq::Socket, timeout: Duration) -> Result<bool> {
    let n = socket.poll(zmq::POLLIN, timeout.as_millis() as i64)?;
    Ok(n > 0)
}

/// Receives a complete multipart message without blocking.
///
/// `Ok(None)` means nothing was waiting.
pub fn try_recv_frames(socket: &zmq::Socket) -> Result<Option<Vec<Vec<u8>>>> {
    match socket.recv_multipart(zmq::DONTWAIT) {
        Ok(frames) => Ok(Some(frames)),
        Err(zmq::Error::EAGAIN) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Sends a multipart message without blocking.
///
/// Returns `false` if the message was not queued because the socket's
/// high-water mark was reached or there was no peer to route it to.
pub fn try_send_frames(socket: &zmq::Socket, frames: &[&[u8]]) -> Result<bool> {
    match socket.send_multipart(frames.iter().copied(), zmq::DONTWAIT) {
        Ok(()) => Ok(true),
        Err(zmq::Error::EAGAIN) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Converts a duration into a zmq timeout option value.
pub fn timeout_ms(timeout: Duration) -> i32 {
    timeout.as_millis().min(i32::MAX as u128) as i32
}
