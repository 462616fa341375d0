//! This library makes plain Rust values reachable over ZeroMQ.
//!
//! Types described by a [`zro_core::RemoteObject`] capability table are
//! served by a [`RemoteObjectServer`] on a REP socket. Any peer holding a
//! [`DeviceProxy`] can then read and write the exposed attributes and call
//! the exposed methods, either right away or deferred through async handles.
//!
//! # Networking constructs overview
//!
//! Besides the request/reply core, a server can take on extra *roles*, each
//! bringing its own sockets:
//!
//! - [`Publisher`] and [`Subscriber`] for streaming values, with an
//!   adjustable high-water mark so that slow subscribers only ever see the
//!   freshest value,
//! - [`Producer`], [`Consumer`] and [`Sink`] for spreading work over a pool
//!   of consumers and collecting the results in batches,
//! - [`Heartbeat`] for announcing that the device is alive on a router
//!   topic.
//!
//! Devices are found by name through the [`DeviceManager`], which reads the
//! shared JSON registry, and loosely coupled processes can exchange topic
//! tagged messages through a [`Router`].
//!
//! # Message encodings
//!
//! All payloads are encoded with either MessagePack or JSON, see
//! [`Encoding`]. Servers detect the encoding of each request and answer in
//! kind, so peers using different encodings can share a device. Neither
//! encoding runs peer supplied code while decoding.
//!
//! # Serving a device
//!
//! ```no_run
//! use zro_core::{Exposed, RemoteObject};
//! use zro_net::{Context, RemoteObjectServer, ServerConfig};
//!
//! #[derive(Default)]
//! struct Stage {
//!     position: f64,
//! }
//!
//! impl RemoteObject for Stage {
//!     fn expose(members: Exposed<Self>) -> Exposed<Self> {
//!         members.attribute("position", |s| &s.position, |s| &mut s.position)
//!     }
//! }
//!
//! let ctx = Context::new();
//! let config = ServerConfig::with_port(5000);
//! let mut server = RemoteObjectServer::new(&ctx, Stage::default(), config).unwrap();
//! server.run_forever().unwrap();
//! ```

#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

pub mod auth;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod msg;
pub mod platform;
pub mod proxy;
pub mod router;
pub mod server;
pub mod socket;
pub mod util;

mod context;

pub use auth::AccessList;
pub use config::{
    Config, HeartbeatConfig, PipelineConfig, ProxyConfig, PublisherConfig, RouterConfig,
    ServerConfig,
};
pub use context::Context;
pub use device::{
    Collects, Consumer, Heartbeat, HeartbeatMessage, Processes, Producer, Publisher, Publishes,
    Role, Sink, Subscriber, Subscribes,
};
pub use error::{Error, Result};
pub use manager::{DeviceManager, Ping};
pub use msg::{Envelope, Reply};
pub use platform::PlatformInfo;
pub use proxy::{Attribute, BoundCall, DeviceProxy};
pub use router::{Router, RouterClient, RouterMessage};
pub use server::{serve, RemoteObjectServer};
pub use socket::Encoding;
