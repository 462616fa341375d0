use std::any::Any;
use std::time::Duration;

use zro_core::{to_value, Call, CallError, Value};

use super::Role;
use crate::config::PublisherConfig;
use crate::socket::zmq::{rebind, release, swap_bound, try_send_frames};
use crate::socket::{pack, Encoding};
use crate::{Context, Error, Result};

/// Hook for publishers that produce their own messages.
pub trait Publishes {
    /// Message to publish when `publish` is called without a value, or on
    /// every update tick while publishing is on. `None` skips the tick.
    fn next_message(&mut self) -> Option<Value> {
        None
    }
}

/// Role adding a PUB socket to a device.
///
/// Messages go out as a single frame holding the encoded value. Past the
/// high-water mark the socket drops new messages, so publishing never
/// blocks.
pub struct Publisher {
    ctx: Context,
    socket: Option<zmq::Socket>,
    config: PublisherConfig,
    port: u16,
    publishing: bool,
    published: u64,
}

impl Publisher {
    pub fn new(ctx: &Context, config: PublisherConfig) -> Result<Self> {
        let socket = Self::open(ctx, config.hwm)?;
        let port = rebind(&socket, &config.ip, config.pub_port)?;
        info!("publishing on port {}", port);
        Ok(Self {
            ctx: ctx.clone(),
            socket: Some(socket),
            config,
            port,
            publishing: false,
            published: 0,
        })
    }

    fn open(ctx: &Context, hwm: i32) -> Result<zmq::Socket> {
        let socket = ctx.socket(zmq::PUB)?;
        socket.set_sndhwm(hwm)?;
        Ok(socket)
    }

    /// Moves the publish socket to a new ip and port, closing the old one.
    /// The old socket stays in place when the new endpoint can't be bound.
    pub fn set_publish_ip(&mut self, ip: &str, port: Option<u16>) -> Result<u16> {
        let fresh = Self::open(&self.ctx, self.config.hwm)?;
        let current = self.socket.as_mut().ok_or(Error::Closed)?;
        self.port = swap_bound(current, self.port, fresh, ip, port)?;
        self.config.ip = ip.to_string();
        self.config.pub_port = port;
        info!("publishing on port {}", self.port);
        Ok(self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn hwm(&self) -> i32 {
        self.config.hwm
    }

    /// Changes the high-water mark. The socket is rebound on the same port
    /// so the new depth applies to every subscriber.
    pub fn set_hwm(&mut self, hwm: i32) -> Result<()> {
        self.config.hwm = hwm;
        let ip = self.config.ip.clone();
        self.set_publish_ip(&ip, Some(self.port))?;
        Ok(())
    }

    pub fn encoding(&self) -> Encoding {
        self.config.encoding
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.config.encoding = encoding;
    }

    pub fn publishing(&self) -> bool {
        self.publishing
    }

    /// Turns publishing on update ticks on or off.
    pub fn set_publishing(&mut self, on: bool) {
        self.publishing = on;
    }

    /// Number of messages handed to the socket.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Publishes a single value.
    pub fn publish_value(&mut self, value: &Value) -> Result<()> {
        let bytes = pack(value, self.config.encoding)?;
        let socket = self.socket.as_ref().ok_or(Error::Closed)?;
        if try_send_frames(socket, &[bytes.as_slice()])? {
            self.published += 1;
        } else {
            warn!("publish queue full, message dropped");
        }
        Ok(())
    }

    /// Publishes `value`, or the target's next message if there is none.
    /// Returns whether anything was published.
    pub fn publish<T: Publishes>(
        &mut self,
        target: &mut T,
        value: Option<Value>,
    ) -> Result<bool> {
        match value.or_else(|| target.next_message()) {
            Some(value) => {
                self.publish_value(&value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<T: Publishes + Send + 'static> Role<T> for Publisher {
    fn name(&self) -> &'static str {
        "publisher"
    }

    fn commands(&self) -> &'static [&'static str] {
        &["publish"]
    }

    fn attributes(&self) -> &'static [&'static str] {
        &["encoding", "hwm", "pub_port", "publishing"]
    }

    fn writable(&self) -> &'static [&'static str] {
        &["encoding", "hwm", "publishing"]
    }

    fn get(&self, name: &str) -> std::result::Result<Value, CallError> {
        match name {
            "encoding" => to_value(self.config.encoding),
            "hwm" => to_value(self.config.hwm),
            "pub_port" => to_value(self.port),
            "publishing" => to_value(self.publishing),
            _ => Err(CallError::raised(format!("no publisher attribute {}", name))),
        }
    }

    fn set(&mut self, name: &str, value: Value) -> std::result::Result<(), CallError> {
        match name {
            "encoding" => self.config.encoding = serde_json::from_value(value)?,
            "hwm" => self.set_hwm(serde_json::from_value(value)?)?,
            "publishing" => self.publishing = serde_json::from_value(value)?,
            _ => return Err(CallError::raised(format!("can't set {}", name))),
        }
        Ok(())
    }

    fn run(
        &mut self,
        target: &mut T,
        name: &str,
        call: &Call,
    ) -> std::result::Result<Value, CallError> {
        match name {
            "publish" => {
                let value = call.opt_arg::<Value>(0, "value")?;
                let published = self.publish(target, value)?;
                to_value(published)
            }
            _ => Err(CallError::raised(format!("no publisher method {}", name))),
        }
    }

    fn on_update(&mut self, target: &mut T) -> Result<()> {
        if self.publishing {
            self.publish(target, None)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.publishing = false;
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

    struct Quiet;
    impl Publishes for Quiet {}

    fn local() -> PublisherConfig {
        PublisherConfig {
            ip: "127.0.0.1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn taken_port_leaves_publisher_in_place() {
        let ctx = Context::new();
        let mut first = Publisher::new(&ctx, local()).unwrap();
        let second = Publisher::new(&ctx, local()).unwrap();
        let port = first.port();
        assert!(first.set_publish_ip("127.0.0.1", Some(second.port())).is_err());
        assert_eq!(first.port(), port);
        first.publish_value(&serde_json::json!("still up")).unwrap();
        assert_eq!(first.published(), 1);
    }

    #[test]
    fn closed_publisher_frees_its_port() {
        let ctx = Context::new();
        let mut publisher = Publisher::new(&ctx, local()).unwrap();
        let port = publisher.port();
        <Publisher as Role<Quiet>>::close(&mut publisher);
        assert!(matches!(
            publisher.publish_value(&serde_json::json!(1)),
            Err(Error::Closed)
        ));
        let config = PublisherConfig {
            pub_port: Some(port),
            ..local()
        };
        let again = Publisher::new(&ctx, config).unwrap();
        assert_eq!(again.port(), port);
    }
}
