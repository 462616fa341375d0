//! Dynamic values and call arguments.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ErrorCode, RemoteError};

/// Dynamic value exchanged with remote peers.
pub use serde_json::Value;

/// Positional call arguments.
pub type Args = Vec<Value>;

/// Keyword call arguments.
pub type Kwargs = serde_json::Map<String, Value>;

/// Converts any serializable value into a [`Value`].
pub fn to_value<T: Serialize>(value: T) -> Result<Value, CallError> {
    serde_json::to_value(value).map_err(|e| CallError::raised(e.to_string()))
}

/// Arguments of a single remote call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Call {
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub kwargs: Kwargs,
}

impl Call {
    pub fn new(args: Args, kwargs: Kwargs) -> Self {
        Self { args, kwargs }
    }

    pub fn positional(args: Args) -> Self {
        Self {
            args,
            kwargs: Kwargs::new(),
        }
    }

    /// Looks up an argument by keyword first, then by position.
    pub fn raw(&self, index: usize, name: &str) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| self.args.get(index))
    }

    /// Required argument.
    pub fn arg<V: DeserializeOwned>(&self, index: usize, name: &str) -> Result<V, CallError> {
        match self.raw(index, name) {
            Some(value) => decode_arg(value, name),
            None => Err(CallError::invalid_args(format!(
                "missing required argument `{}` (position {})",
                name, index
            ))),
        }
    }

    /// Optional argument, `None` when missing or `null`.
    pub fn opt_arg<V: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> Result<Option<V>, CallError> {
        match self.raw(index, name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode_arg(value, name).map(Some),
        }
    }

    /// Optional argument with a default.
    pub fn arg_or<V: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
        default: V,
    ) -> Result<V, CallError> {
        Ok(self.opt_arg(index, name)?.unwrap_or(default))
    }

    /// Returns a copy of this call with the first `n` positional arguments
    /// removed.
    pub fn shifted(&self, n: usize) -> Call {
        Call {
            args: self.args.iter().skip(n).cloned().collect(),
            kwargs: self.kwargs.clone(),
        }
    }
}

fn decode_arg<V: DeserializeOwned>(value: &Value, name: &str) -> Result<V, CallError> {
    serde_json::from_value(value.clone())
        .map_err(|e| CallError::invalid_args(format!("argument `{}`: {}", name, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorKind {
    InvalidArguments,
    Raised,
}

/// Failure reported by an exposed accessor or method.
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    pub fn raised(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Raised,
            message: message.into(),
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::InvalidArguments,
            message: message.into(),
        }
    }

    /// Converts into the wire error aimed at `target`.
    pub fn into_remote(self, target: &str) -> RemoteError {
        let code = match self.kind {
            CallErrorKind::InvalidArguments => ErrorCode::ArgumentsInvalid,
            CallErrorKind::Raised => ErrorCode::CallRaised,
        };
        RemoteError::new(code, target).with_message(self.message)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CallError {}

impl From<String> for CallError {
    fn from(s: String) -> Self {
        CallError::raised(s)
    }
}

impl From<&str> for CallError {
    fn from(s: &str) -> Self {
        CallError::raised(s)
    }
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::invalid_args(e.to_string())
    }
}

impl From<crate::Error> for CallError {
    fn from(e: crate::Error) -> Self {
        CallError::raised(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyword_wins_over_position() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("b".to_string(), json!(20));
        let call = Call::new(vec![json!(1), json!(2)], kwargs);
        assert_eq!(call.arg::<i64>(0, "a").unwrap(), 1);
        assert_eq!(call.arg::<i64>(1, "b").unwrap(), 20);
    }

    #[test]
    fn missing_and_mistyped_arguments() {
        let call = Call::positional(vec![json!("text")]);
        let err = call.arg::<i64>(0, "n").unwrap_err();
        assert_eq!(err.kind, CallErrorKind::InvalidArguments);
        assert!(call.arg::<i64>(3, "m").is_err());
        assert_eq!(call.opt_arg::<i64>(3, "m").unwrap(), None);
        assert_eq!(call.arg_or(3, "m", 7i64).unwrap(), 7);
    }

    #[test]
    fn shifted_drops_leading_args() {
        let call = Call::positional(vec![json!("name"), json!(1), json!(2)]);
        assert_eq!(call.shifted(1).args, vec![json!(1), json!(2)]);
    }
}
