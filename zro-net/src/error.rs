use zro_core::{ErrorCode, RemoteError};

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Enumeration of errors that may occur during network operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("would block")]
    WouldBlock,
    #[error("device at {0} is unreachable")]
    Unreachable(String),
    #[error("host unreachable: {0}")]
    HostUnreachable(String),
    #[error("handshake failed, got: {0}")]
    HandshakeFailed(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("payload could not be decoded with any known encoding: {0}")]
    UndecodablePayload(String),
    #[error("payload has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("no sink connected")]
    NoSink,
    #[error("server is closed")]
    Closed,

    #[error("{0}")]
    Remote(RemoteError),

    #[error("other: {0}")]
    Other(String),

    #[error("failed parsing int: {0}")]
    IntParseError(#[from] std::num::ParseIntError),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("zmq error: {0}")]
    ZmqError(#[from] zmq::Error),

    #[error("rmp_serde decode error: {0}")]
    RmpsDecodeError(#[from] rmp_serde::decode::Error),
    #[error("rmp_serde encode error: {0}")]
    RmpsEncodeError(#[from] rmp_serde::encode::Error),
    #[error("serde_json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("toml deserialization error: {0}")]
    TomlDeserError(#[from] toml::de::Error),

    #[error("core error: {0}")]
    CoreError(zro_core::Error),
}

impl Error {
    /// Taxonomy code best describing this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Remote(e) => e.code,
            Error::Unreachable(_) | Error::HostUnreachable(_) => ErrorCode::Unreachable,
            Error::CoreError(e) => e.code(),
            _ => ErrorCode::Unhandled,
        }
    }

    /// Structured remote error, if the failure was reported by the peer.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Error::Remote(e) => Some(e),
            Error::CoreError(zro_core::Error::Remote(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Error::Remote(e)
    }
}

impl From<zro_core::Error> for Error {
    fn from(e: zro_core::Error) -> Self {
        match e {
            zro_core::Error::Remote(r) => Error::Remote(r),
            e => Error::CoreError(e),
        }
    }
}

impl From<Error> for zro_core::CallError {
    fn from(e: Error) -> Self {
        zro_core::CallError::raised(e.to_string())
    }
}
