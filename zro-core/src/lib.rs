//! Transport-free building blocks for `zro` remote objects.
//!
//! A *device* is a plain Rust value made reachable over the network. This
//! crate defines everything about that arrangement that doesn't require an
//! actual socket:
//!
//! - the dynamic [`Value`] type used for attribute values, call arguments
//!   and results,
//! - the [`Exposed`] capability table listing which members of a type can
//!   be read, written or called remotely, together with the
//!   [`RemoteObject`] trait tying a type to its table,
//! - the error code taxonomy and the structured [`RemoteError`] that travels
//!   back to callers,
//! - the JSON device [`Registry`] used to find devices by name.
//!
//! The `zro-net` crate builds the actual servers, proxies and router on top
//! of these definitions.
//!
//! # Exposing a type
//!
//! ```
//! use zro_core::{Call, CallError, Exposed, RemoteObject};
//!
//! #[derive(Default)]
//! struct Counter {
//!     count: i64,
//! }
//!
//! impl RemoteObject for Counter {
//!     fn expose(members: Exposed<Self>) -> Exposed<Self> {
//!         members
//!             .attribute("count", |c| &c.count, |c| &mut c.count)
//!             .method("increment", |c, call: &Call| {
//!                 let by: i64 = call.arg_or(0, "by", 1)?;
//!                 c.count += by;
//!                 Ok::<_, CallError>(c.count)
//!             })
//!     }
//! }
//! ```

#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

pub mod error;
pub mod expose;
pub mod registry;
pub mod util;
pub mod value;

pub use error::{Error, ErrorCode, RemoteError, Result};
pub use expose::{Exposed, Member, RemoteObject, RESERVED_NAMES};
pub use registry::{DeviceEntry, Registry};
pub use value::{to_value, Args, Call, CallError, Kwargs, Value};

/// Literal returned in place of a value when `GET` targets a method.
pub const CALLABLE_SENTINEL: &str = "callable";

/// Literal returned on a successful `SET`.
pub const SET_OK: &str = "0";

/// Crate version, reported in platform info.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
