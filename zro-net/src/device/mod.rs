//! Device roles.
//!
//! A device is a [`RemoteObjectServer`](crate::RemoteObjectServer) with zero
//! or more roles attached. Each role owns its extra sockets, answers to its
//! own remote members, and is serviced by the server's reactor every cycle.
//! Roles that need application logic call back into the target through a
//! hook trait the target implements:
//!
//! | role         | sockets               | target hook     |
//! |--------------|-----------------------|-----------------|
//! | [`Publisher`]  | PUB, bound            | [`Publishes`]   |
//! | [`Subscriber`] | SUB per source        | [`Subscribes`]  |
//! | [`Producer`]   | PUSH, bound           | none            |
//! | [`Consumer`]   | PULL and PUSH         | [`Processes`]   |
//! | [`Sink`]       | PULL, bound           | [`Collects`]    |
//! | [`Heartbeat`]  | DEALER to a router    | none            |

use std::any::Any;

use zro_core::{Call, CallError, Value};

use crate::Result;

pub mod heartbeat;
pub mod pipeline;
pub mod publisher;
pub mod subscriber;

pub use heartbeat::{Heartbeat, HeartbeatMessage};
pub use pipeline::{Collects, Consumer, Processes, Producer, Sink};
pub use publisher::{Publisher, Publishes};
pub use subscriber::{Subscriber, Subscribes};

/// Extra socket role attached to a server.
pub trait Role<T>: Send + 'static {
    fn name(&self) -> &'static str;

    /// Remote methods answered by this role.
    fn commands(&self) -> &'static [&'static str];

    /// Remote attributes answered by this role.
    fn attributes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Attributes that also accept writes.
    fn writable(&self) -> &'static [&'static str] {
        &[]
    }

    fn get(&self, name: &str) -> std::result::Result<Value, CallError> {
        Err(CallError::raised(format!("{} has no attribute {}", self.name(), name)))
    }

    fn set(&mut self, name: &str, _value: Value) -> std::result::Result<(), CallError> {
        Err(CallError::raised(format!("{} can't set {}", self.name(), name)))
    }

    fn run(
        &mut self,
        target: &mut T,
        name: &str,
        call: &Call,
    ) -> std::result::Result<Value, CallError>;

    /// Handles whatever arrived on the role's sockets without blocking.
    /// Returns the number of messages handled.
    fn service(&mut self, _target: &mut T) -> Result<usize> {
        Ok(0)
    }

    /// Runs on every update tick of the server.
    fn on_update(&mut self, _target: &mut T) -> Result<()> {
        Ok(())
    }

    /// Closes the role's sockets.
    fn close(&mut self) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Names a role exposes, both kinds together.
pub(crate) fn role_names<T: 'static>(role: &dyn Role<T>) -> Vec<&'static str> {
    role.commands()
        .iter()
        .chain(role.attributes().iter())
        .copied()
        .collect()
}
