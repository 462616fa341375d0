use std::any::Any;

use zro_core::{to_value, Call, CallError, Value};

use super::Role;
use crate::socket::unpack_detect;
use crate::socket::zmq::try_recv_frames;
use crate::util::get_address;
use crate::{Context, Result};

/// Hook receiving messages from subscribed publishers.
pub trait Subscribes {
    /// Called once per message, `source` being the publisher's address.
    fn handle_message(&mut self, source: &str, message: Value);
}

/// Role holding one SUB socket per upstream publisher, so the source of
/// every message is known.
pub struct Subscriber {
    ctx: Context,
    subscriptions: Vec<(String, zmq::Socket)>,
    received: u64,
}

impl Subscriber {
    pub fn new(ctx: &Context) -> Self {
        Self {
            ctx: ctx.clone(),
            subscriptions: Vec::new(),
            received: 0,
        }
    }

    /// Subscribes to everything published at `ip:port`.
    ///
    /// With `hwm` of 1 the socket keeps only the newest message, older
    /// unread ones are replaced. Returns the publisher address.
    pub fn add_subscription(&mut self, ip: &str, port: u16, hwm: i32) -> Result<String> {
        let address = get_address(ip, Some(port))?;
        if self.subscriptions.iter().any(|(a, _)| *a == address) {
            warn!("already subscribed to {}", address);
            return Ok(address);
        }
        let socket = self.ctx.socket(zmq::SUB)?;
        if hwm == 1 {
            socket.set_conflate(true)?;
        } else {
            socket.set_rcvhwm(hwm)?;
        }
        socket.set_subscribe(b"")?;
        socket.connect(&address)?;
        info!("added subscription to {}", address);
        self.subscriptions.push((address.clone(), socket));
        Ok(address)
    }

    /// Removes subscriptions whose address contains `ip`, and `port` when
    /// given. Returns the number removed.
    pub fn remove_subscription(&mut self, ip: &str, port: Option<u16>) -> usize {
        let pattern = match port {
            Some(port) => format!("{}:{}", ip, port),
            None => ip.to_string(),
        };
        let before = self.subscriptions.len();
        self.subscriptions.retain(|(address, _)| {
            let matched = address.contains(&pattern);
            if matched {
                info!("removed subscription to {}", address);
            }
            !matched
        });
        before - self.subscriptions.len()
    }

    pub fn remove_all_subscriptions(&mut self) {
        self.subscriptions.clear();
        info!("removed all subscriptions");
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.iter().map(|(a, _)| a.clone()).collect()
    }

    /// Total number of messages handed to the target.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Drains every subscription socket into the target's handler.
    pub fn drain<T: Subscribes>(&mut self, target: &mut T) -> Result<usize> {
        let mut handled = 0;
        for (address, socket) in &self.subscriptions {
            while let Some(mut frames) = try_recv_frames(socket)? {
                let payload = frames.pop().unwrap_or_default();
                match unpack_detect::<Value>(&payload) {
                    Ok((message, _)) => {
                        target.handle_message(address, message);
                        handled += 1;
                    }
                    Err(e) => warn!("undecodable message from {}: {}", address, e),
                }
            }
        }
        self.received += handled as u64;
        Ok(handled)
    }
}

impl<T: Subscribes + Send + 'static> Role<T> for Subscriber {
    fn name(&self) -> &'static str {
        "subscriber"
    }

    fn commands(&self) -> &'static [&'static str] {
        &[
            "add_subscription",
            "get_subscriptions",
            "remove_all_subscriptions",
            "remove_subscription",
        ]
    }

    fn run(
        &mut self,
        _target: &mut T,
        name: &str,
        call: &Call,
    ) -> std::result::Result<Value, CallError> {
        match name {
            "add_subscription" => {
                let ip: String = call.arg(0, "ip")?;
                let port: u16 = call.arg(1, "port")?;
                let hwm: i32 = call.arg_or(2, "hwm", 1)?;
                to_value(self.add_subscription(&ip, port, hwm)?)
            }
            "remove_subscription" => {
                let ip: String = call.arg(0, "ip")?;
                let port: Option<u16> = call.opt_arg(1, "port")?;
                to_value(self.remove_subscription(&ip, port))
            }
            "remove_all_subscriptions" => {
                self.remove_all_subscriptions();
                Ok(Value::Null)
            }
            "get_subscriptions" => to_value(self.subscriptions()),
            _ => Err(CallError::raised(format!("no subscriber method {}", name))),
        }
    }

    fn service(&mut self, target: &mut T) -> Result<usize> {
        self.drain(target)
    }

    fn close(&mut self) {
        self.subscriptions.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
