//! Client side stand-in for a remote device.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use zro_core::{Args, Kwargs, Value, SET_OK};

use crate::msg::{
    Envelope, GetRequest, IsCallableRequest, Payload, PlatformInfoRequest, Reply, RunRequest,
    SetRequest,
};
use crate::platform::PlatformInfo;
use crate::socket::zmq::timeout_ms;
use crate::socket::Encoding;
use crate::util::{has_port, tcp_endpoint};
use crate::{Context, Error, ProxyConfig, Result};

/// Result of reading a member through a proxy.
pub enum Attribute<'a> {
    Value(Value),
    /// The member is a method, calls go through the bound forwarder.
    Method(BoundCall<'a>),
}

impl<'a> Attribute<'a> {
    pub fn is_method(&self) -> bool {
        matches!(self, Attribute::Method(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Attribute::Value(v) => Some(v),
            Attribute::Method(_) => None,
        }
    }
}

/// Remote method bound to a proxy.
pub struct BoundCall<'a> {
    proxy: &'a mut DeviceProxy,
    name: String,
}

impl<'a> BoundCall<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(self, args: Args) -> Result<Value> {
        self.proxy.call(&self.name, args)
    }

    pub fn call_with(self, args: Args, kwargs: Kwargs) -> Result<Value> {
        self.proxy.call_with(&self.name, args, kwargs)
    }
}

/// Makes a remote device look like a local object.
///
/// Every operation is one request/reply round trip bounded by the proxy's
/// timeout. When a round trip times out the request socket is thrown away
/// and rebuilt, so the next call starts clean. Only one request can be in
/// flight per proxy; share a proxy between threads behind a lock.
pub struct DeviceProxy {
    ctx: Context,
    address: String,
    config: ProxyConfig,
    socket: zmq::Socket,
}

impl DeviceProxy {
    /// Connects to the device at `address` (`host:port` or
    /// `tcp://host:port`).
    pub fn connect(ctx: &Context, address: &str, timeout: Duration) -> Result<Self> {
        let config = ProxyConfig {
            timeout_ms: timeout.as_millis() as u64,
            ..Default::default()
        };
        Self::with_config(ctx, address, config)
    }

    pub fn with_config(ctx: &Context, address: &str, config: ProxyConfig) -> Result<Self> {
        if !has_port(address) {
            return Err(Error::Other(format!("no port in device address: {}", address)));
        }
        let address = tcp_endpoint(address);
        let socket = open(ctx, &address, config.timeout())?;
        Ok(Self {
            ctx: ctx.clone(),
            address,
            config,
            socket,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.timeout_ms = timeout.as_millis() as u64;
        self.reconnect()
    }

    pub fn encoding(&self) -> Encoding {
        self.config.encoding
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.config.encoding = encoding;
    }

    /// Replaces the request socket with a fresh one.
    pub fn reconnect(&mut self) -> Result<()> {
        self.socket = open(&self.ctx, &self.address, self.config.timeout())?;
        debug!("rebuilt request socket for {}", self.address);
        Ok(())
    }

    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        match self.socket.send_multipart(envelope.frames(), 0) {
            Ok(()) => Ok(()),
            Err(e) => {
                // one more try on a clean socket
                debug!("send to {} failed ({}), retrying", self.address, e);
                self.reconnect()?;
                match self.socket.send_multipart(envelope.frames(), 0) {
                    Ok(()) => Ok(()),
                    Err(zmq::Error::EAGAIN) => {
                        self.reconnect()?;
                        Err(Error::Unreachable(self.address.clone()))
                    }
                    Err(e) => {
                        self.reconnect()?;
                        Err(e.into())
                    }
                }
            }
        }
    }

    fn exchange(&mut self, envelope: &Envelope) -> Result<Reply> {
        self.send(envelope)?;
        let frames = match self.socket.recv_multipart(0) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => {
                warn!("{} timed out after {:?}", self.address, self.timeout());
                self.reconnect()?;
                return Err(Error::Unreachable(self.address.clone()));
            }
            Err(e) => {
                self.reconnect()?;
                return Err(e.into());
            }
        };
        let reply = Envelope::from_frames(frames)?;
        Reply::from_envelope(&reply, self.config.encoding)?.into_result()
    }

    fn request<P: Payload>(&mut self, payload: &P) -> Result<Reply> {
        let envelope = Envelope::from_payload(payload, self.config.encoding)?;
        trace!("{} -> {}", envelope.message_id, self.address);
        self.exchange(&envelope)
    }

    /// Reads a member. Methods come back as a bound forwarder instead of a
    /// value.
    pub fn get(&mut self, name: &str) -> Result<Attribute<'_>> {
        let reply = self.request(&GetRequest {
            name: name.to_string(),
        })?;
        match reply {
            Reply::Callable => Ok(Attribute::Method(self.bound(name))),
            Reply::Value(value) => Ok(Attribute::Value(value)),
            Reply::Error(e) => Err(Error::Remote(e)),
        }
    }

    /// Reads an attribute value, failing if the member is a method.
    pub fn get_value(&mut self, name: &str) -> Result<Value> {
        match self.get(name)? {
            Attribute::Value(value) => Ok(value),
            Attribute::Method(_) => Err(Error::UnexpectedReply(format!(
                "`{}` is a method, not an attribute",
                name
            ))),
        }
    }

    pub fn get_as<V: DeserializeOwned>(&mut self, name: &str) -> Result<V> {
        Ok(serde_json::from_value(self.get_value(name)?)?)
    }

    pub fn set<V: Serialize>(&mut self, name: &str, value: V) -> Result<()> {
        let reply = self.request(&SetRequest {
            name: name.to_string(),
            value: serde_json::to_value(value)?,
        })?;
        match reply {
            Reply::Value(Value::String(s)) if s == SET_OK => Ok(()),
            other => Err(Error::UnexpectedReply(format!("{:?}", other))),
        }
    }

    pub fn call(&mut self, name: &str, args: Args) -> Result<Value> {
        self.call_with(name, args, Kwargs::new())
    }

    pub fn call_with(&mut self, name: &str, args: Args, kwargs: Kwargs) -> Result<Value> {
        let reply = self.request(&RunRequest {
            callable: name.to_string(),
            args,
            kwargs,
        })?;
        match reply {
            Reply::Value(value) => Ok(value),
            other => Err(Error::UnexpectedReply(format!("{:?}", other))),
        }
    }

    pub fn call_as<V: DeserializeOwned>(&mut self, name: &str, args: Args) -> Result<V> {
        Ok(serde_json::from_value(self.call(name, args)?)?)
    }

    pub fn bound(&mut self, name: &str) -> BoundCall<'_> {
        BoundCall {
            proxy: self,
            name: name.to_string(),
        }
    }

    pub fn is_callable(&mut self, name: &str) -> Result<bool> {
        match self.request(&IsCallableRequest {
            name: name.to_string(),
        })? {
            Reply::Value(Value::Bool(b)) => Ok(b),
            other => Err(Error::UnexpectedReply(format!("{:?}", other))),
        }
    }

    /// Asks for the platform record, which the device answers without
    /// touching its target.
    pub fn platform_info(&mut self) -> Result<PlatformInfo> {
        match self.request(&PlatformInfoRequest {})? {
            Reply::Value(value) => Ok(serde_json::from_value(value)?),
            other => Err(Error::UnexpectedReply(format!("{:?}", other))),
        }
    }

    pub fn uptime(&mut self) -> Result<Duration> {
        let seconds: f64 = self.get_as("uptime")?;
        Ok(Duration::from_secs_f64(seconds.max(0.0)))
    }

    pub fn rep_port(&mut self) -> Result<u16> {
        self.get_as("rep_port")
    }

    /// Time taken by one lightweight round trip.
    pub fn ping(&mut self) -> Result<Duration> {
        let start = Instant::now();
        self.rep_port()?;
        Ok(start.elapsed())
    }

    pub fn command_list(&mut self) -> Result<Vec<String>> {
        self.call_as("get_command_list", vec![])
    }

    pub fn attribute_list(&mut self) -> Result<Vec<String>> {
        self.call_as("get_attribute_list", vec![])
    }

    /// Starts `name` asynchronously on the device, returning the handle.
    pub fn call_async(&mut self, name: &str, args: Args, kwargs: Kwargs) -> Result<u64> {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(Value::from(name));
        full_args.extend(args);
        let handle = self.call_with("call_async", full_args, kwargs)?;
        Ok(serde_json::from_value(handle)?)
    }

    pub fn get_async_result(&mut self, handle: u64, clear: bool) -> Result<Value> {
        self.call("get_async_result", vec![handle.into(), clear.into()])
    }

    pub fn async_result_waiting(&mut self, handle: u64) -> Result<bool> {
        self.call_as("async_result_waiting", vec![handle.into()])
    }

    pub fn abandon_async_result(&mut self, handle: u64) -> Result<()> {
        self.call("abandon_async_result", vec![handle.into()])?;
        Ok(())
    }

    /// Makes the device send results of async `method` calls to
    /// `dest_method` on the device at `dest_address`.
    pub fn register_async_callback(
        &mut self,
        method: &str,
        dest_address: &str,
        dest_method: &str,
    ) -> Result<()> {
        self.call(
            "register_async_callback",
            vec![method.into(), dest_address.into(), dest_method.into()],
        )?;
        Ok(())
    }

    pub fn unregister_async_callback(
        &mut self,
        method: &str,
        dest_address: &str,
        dest_method: &str,
    ) -> Result<bool> {
        self.call_as(
            "unregister_async_callback",
            vec![method.into(), dest_address.into(), dest_method.into()],
        )
    }

    /// Asks the device to shut down.
    pub fn close_remote(&mut self) -> Result<()> {
        self.call("close", vec![])?;
        Ok(())
    }
}

fn open(ctx: &Context, address: &str, timeout: Duration) -> Result<zmq::Socket> {
    let socket = ctx.socket(zmq::REQ)?;
    socket.set_sndtimeo(timeout_ms(timeout))?;
    socket.set_rcvtimeo(timeout_ms(timeout))?;
    socket.connect(address)?;
    Ok(socket)
}
