//! Message definitions.
//!
//! Every message travels as an [`Envelope`]: a message id naming the kind of
//! message (a command, a reply kind or a router topic) and an encoded
//! payload. Request/reply sockets carry two frames, `[message_id, payload]`.
//! Router sockets prepend the peer identity, `[identity, message_id,
//! payload]`; a router frame set whose message id is empty is a connection
//! handshake rather than a message.

use serde::de::DeserializeOwned;
use serde::Serialize;

use zro_core::{RemoteError, Value, CALLABLE_SENTINEL};

use crate::socket::{pack, unpack, unpack_detect, Encoding};
use crate::{Error, Result};

pub mod request;

pub use request::*;

/// Payload structs know which message id they travel under.
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn kind_str(&self) -> &str {
        Self::KIND
    }
}

/// Single message with its framing.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Peer identity, only present on router sockets.
    pub routing_id: Option<Vec<u8>>,
    pub message_id: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(message_id: &str, payload: Vec<u8>) -> Self {
        Self {
            routing_id: None,
            message_id: message_id.to_string(),
            payload,
        }
    }

    /// Creates a complete envelope from a payload struct.
    pub fn from_payload<P: Payload>(payload: &P, encoding: Encoding) -> Result<Self> {
        Ok(Self::new(payload.kind_str(), pack(payload, encoding)?))
    }

    /// Unpacks the payload into a struct of the provided type, detecting the
    /// encoding.
    pub fn unpack_payload<P: DeserializeOwned>(&self) -> Result<(P, Encoding)> {
        unpack_detect(&self.payload)
    }

    /// Parses request/reply frames.
    pub fn from_frames(mut frames: Vec<Vec<u8>>) -> Result<Self> {
        if frames.len() != 2 {
            return Err(Error::MalformedEnvelope(format!(
                "expected 2 frames, got {}",
                frames.len()
            )));
        }
        let payload = frames.pop().unwrap_or_default();
        let message_id = message_id_from(frames.pop().unwrap_or_default())?;
        if message_id.is_empty() {
            return Err(Error::MalformedEnvelope("empty message id".to_string()));
        }
        Ok(Self {
            routing_id: None,
            message_id,
            payload,
        })
    }

    /// Parses router frames. A two frame set with an empty second frame is
    /// accepted as a handshake.
    pub fn from_routed_frames(mut frames: Vec<Vec<u8>>) -> Result<Self> {
        match frames.len() {
            2 if frames[1].is_empty() => Ok(Self {
                routing_id: Some(frames.remove(0)),
                message_id: String::new(),
                payload: Vec::new(),
            }),
            3 => {
                let payload = frames.pop().unwrap_or_default();
                let message_id = message_id_from(frames.pop().unwrap_or_default())?;
                Ok(Self {
                    routing_id: frames.pop(),
                    message_id,
                    payload,
                })
            }
            n => Err(Error::MalformedEnvelope(format!(
                "expected 3 frames, got {}",
                n
            ))),
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.routing_id.is_some() && self.message_id.is_empty()
    }

    /// Frames to put on the wire, identity first when present.
    pub fn frames(&self) -> Vec<&[u8]> {
        let mut frames: Vec<&[u8]> = Vec::with_capacity(3);
        if let Some(id) = &self.routing_id {
            frames.push(id);
        }
        frames.push(self.message_id.as_bytes());
        frames.push(&self.payload);
        frames
    }
}

fn message_id_from(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| Error::MalformedEnvelope("message id is not valid utf-8".to_string()))
}

pub(crate) const REPLY_OK: &str = "ok";
pub(crate) const REPLY_CALLABLE: &str = "callable";
pub(crate) const REPLY_ERROR: &str = "error";

/// Reply to a single request.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Value(Value),
    /// The requested member is a method.
    Callable,
    Error(RemoteError),
}

impl Reply {
    pub fn into_envelope(self, encoding: Encoding) -> Result<Envelope> {
        let envelope = match self {
            Reply::Value(value) => Envelope::new(REPLY_OK, pack(&value, encoding)?),
            Reply::Callable => Envelope::new(REPLY_CALLABLE, pack(CALLABLE_SENTINEL, encoding)?),
            Reply::Error(err) => Envelope::new(REPLY_ERROR, pack(&err, encoding)?),
        };
        Ok(envelope)
    }

    /// Parses a reply. Replies always use the encoding of the request they
    /// answer, so no detection is done here.
    pub fn from_envelope(envelope: &Envelope, encoding: Encoding) -> Result<Self> {
        match envelope.message_id.as_str() {
            REPLY_OK => Ok(Reply::Value(unpack(&envelope.payload, encoding)?)),
            REPLY_CALLABLE => Ok(Reply::Callable),
            REPLY_ERROR => Ok(Reply::Error(unpack(&envelope.payload, encoding)?)),
            other => Err(Error::UnexpectedReply(other.to_string())),
        }
    }

    /// Turns an error reply into an `Err`.
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(e) => Err(Error::Remote(e)),
            r => Ok(r),
        }
    }
}

impl From<std::result::Result<Value, RemoteError>> for Reply {
    fn from(r: std::result::Result<Value, RemoteError>) -> Self {
        match r {
            Ok(v) => Reply::Value(v),
            Err(e) => Reply::Error(e),
        }
    }
}
