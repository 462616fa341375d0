//! Error types.

use std::convert::TryFrom;
use std::fmt;
use std::io;

use num_enum::TryFromPrimitive;
use serde_repr::{Deserialize_repr, Serialize_repr};

pub type Result<T> = core::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

/// Crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(String),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("device {0} not in registry")]
    RegistryNotFound(String),
    #[error("registry conflict: {0}")]
    ConfigConflict(String),
    #[error("system variable not found: {0}")]
    SystemVarNotFound(String),

    #[error("invalid member name: {0}")]
    InvalidMemberName(String),
    #[error("member registered twice: {0}")]
    DuplicateMember(String),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("other: {0}")]
    Other(String),
}

impl Error {
    /// Taxonomy code best describing this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::RegistryNotFound(_) => ErrorCode::RegistryNotFound,
            Error::ConfigConflict(_) => ErrorCode::ConfigConflict,
            Error::Remote(e) => e.code,
            _ => ErrorCode::Unhandled,
        }
    }
}

/// Numeric error codes carried by [`RemoteError`].
///
/// Values are part of the wire format and must stay stable. Code `2` is
/// reserved; lookups of missing methods report `NoSuchAttribute`.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize_repr,
    Deserialize_repr,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum ErrorCode {
    NoSuchAttribute = 1,
    NotCallable = 3,
    CallRaised = 4,
    ArgumentsInvalid = 5,
    Unhandled = 6,
    HandleUnknown = 7,
    HandleNotReady = 8,
    CallbackFailed = 9,
    Unreachable = 10,
    RegistryNotFound = 11,
    ConfigConflict = 12,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoSuchAttribute => "HAS_NO_ATTRIBUTE",
            ErrorCode::NotCallable => "ATTRIBUTE_NOT_CALLABLE",
            ErrorCode::CallRaised => "CALLABLE_FAILED",
            ErrorCode::ArgumentsInvalid => "ARGUMENTS_INVALID",
            ErrorCode::Unhandled => "UNHANDLED_ERROR",
            ErrorCode::HandleUnknown => "ASYNC_RESULT_INVALID_HANDLE",
            ErrorCode::HandleNotReady => "ASYNC_RESULT_UNFINISHED",
            ErrorCode::CallbackFailed => "ASYNC_CALLBACK_FAILED",
            ErrorCode::Unreachable => "UNREACHABLE",
            ErrorCode::RegistryNotFound => "REGISTRY_NOT_FOUND",
            ErrorCode::ConfigConflict => "CONFIG_CONFLICT",
        }
    }

    pub fn from_u8(code: u8) -> Option<ErrorCode> {
        ErrorCode::try_from(code).ok()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured error value sent back in place of a result.
///
/// `target` names the member (or handle, or device) the failing operation
/// was aimed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(rename = "error_code")]
    pub code: ErrorCode,
    pub target: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl RemoteError {
    pub fn new(code: ErrorCode, target: impl Into<String>) -> Self {
        Self {
            code,
            target: target.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn no_such_attribute(target: &str) -> Self {
        Self::new(ErrorCode::NoSuchAttribute, target)
    }

    pub fn not_callable(target: &str) -> Self {
        Self::new(ErrorCode::NotCallable, target)
    }

    pub fn handle_unknown(handle: u64) -> Self {
        Self::new(ErrorCode::HandleUnknown, handle.to_string())
    }

    pub fn handle_not_ready(handle: u64) -> Self {
        Self::new(ErrorCode::HandleNotReady, handle.to_string())
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{} -> {} -> {}", self.target, self.code, msg),
            None => write!(f, "{} -> {}", self.target, self.code),
        }
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_keep_wire_numbers() {
        assert_eq!(ErrorCode::NoSuchAttribute as u8, 1);
        assert_eq!(ErrorCode::HandleUnknown as u8, 7);
        assert_eq!(ErrorCode::HandleNotReady as u8, 8);
        assert_eq!(ErrorCode::from_u8(2), None);
        assert_eq!(ErrorCode::from_u8(12), Some(ErrorCode::ConfigConflict));
    }

    #[test]
    fn remote_error_json_shape() {
        let err = RemoteError::no_such_attribute("x").with_message("did you mean `y`?");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error_code"], 1);
        assert_eq!(json["target"], "x");
        assert_eq!(
            err.to_string(),
            "x -> HAS_NO_ATTRIBUTE -> did you mean `y`?"
        );
    }
}
