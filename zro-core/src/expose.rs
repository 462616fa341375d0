//! Capability tables describing what a type exposes remotely.
//!
//! Instead of looking members up by name at call time, every exposed type
//! builds an [`Exposed`] table once. The table maps each public name to
//! either an attribute (getter plus optional setter) or a method. Requests
//! naming anything else are rejected before they reach the target.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::value::{to_value, Call, CallError, Value};

/// Member names handled by the server itself. Types can't expose these.
pub const RESERVED_NAMES: &[&str] = &[
    "abandon_async_result",
    "async_result_waiting",
    "call_async",
    "close",
    "get_async_result",
    "get_attribute_list",
    "get_command_list",
    "get_platform_info",
    "get_uptime",
    "platform_info",
    "register_async_callback",
    "rep_port",
    "run_forever",
    "set_allowlist",
    "set_denylist",
    "set_reply_ip",
    "unregister_async_callback",
    "update_interval",
    "uptime",
];

type CallResult<V> = std::result::Result<V, CallError>;

pub type Getter<T> = Box<dyn Fn(&T) -> CallResult<Value> + Send + Sync>;
pub type Setter<T> = Box<dyn Fn(&mut T, Value) -> CallResult<()> + Send + Sync>;
pub type Method<T> = Box<dyn Fn(&mut T, &Call) -> CallResult<Value> + Send + Sync>;
pub type Query<T> = Box<dyn Fn(&T, &Call) -> CallResult<Value> + Send + Sync>;

/// Single exposed member.
pub enum Member<T> {
    Attribute {
        get: Getter<T>,
        set: Option<Setter<T>>,
    },
    Method(Method<T>),
    /// Method that only reads the target. Queries run under shared access,
    /// so attribute reads and other queries proceed while one is running.
    Query(Query<T>),
}

impl<T> Member<T> {
    pub fn is_callable(&self) -> bool {
        matches!(self, Member::Method(_) | Member::Query(_))
    }
}

impl<T> fmt::Debug for Member<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Attribute { set, .. } => {
                write!(f, "Attribute {{ writable: {} }}", set.is_some())
            }
            Member::Method(_) => write!(f, "Method"),
            Member::Query(_) => write!(f, "Query"),
        }
    }
}

/// Types that can be served as remote objects.
///
/// Attribute reads and queries may run on several threads at once, hence
/// the `Sync` bound.
pub trait RemoteObject: Send + Sync + Sized + 'static {
    /// Registers the members reachable over the network.
    fn expose(members: Exposed<Self>) -> Exposed<Self>;

    /// Called periodically when the server has an update interval set.
    fn on_update(&mut self) {}

    /// Called once while the server shuts down.
    fn on_close(&mut self) {}
}

/// Capability table for type `T`.
pub struct Exposed<T> {
    members: BTreeMap<String, Member<T>>,
    rejected: Vec<Error>,
}

impl<T> Default for Exposed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Exposed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.members.iter()).finish()
    }
}

impl<T: 'static> Exposed<T> {
    /// Read-write attribute backed by a field.
    pub fn attribute<V, G, M>(self, name: &str, get: G, get_mut: M) -> Self
    where
        V: Serialize + DeserializeOwned + 'static,
        G: Fn(&T) -> &V + Send + Sync + 'static,
        M: Fn(&mut T) -> &mut V + Send + Sync + 'static,
    {
        self.insert(
            name,
            Member::Attribute {
                get: Box::new(move |t: &T| to_value(get(t))),
                set: Some(Box::new(move |t: &mut T, value: Value| -> CallResult<()> {
                    *get_mut(t) = serde_json::from_value(value)?;
                    Ok(())
                })),
            },
        )
    }

    /// Read-only attribute computed from the target.
    pub fn read_only<V, G>(self, name: &str, get: G) -> Self
    where
        V: Serialize,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.insert(
            name,
            Member::Attribute {
                get: Box::new(move |t: &T| to_value(get(t))),
                set: None,
            },
        )
    }

    /// Attribute with a custom setter, for writes that need validation or
    /// side effects.
    pub fn property<V, G, S>(self, name: &str, get: G, set: S) -> Self
    where
        V: Serialize + DeserializeOwned,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) -> CallResult<()> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Member::Attribute {
                get: Box::new(move |t: &T| to_value(get(t))),
                set: Some(Box::new(move |t: &mut T, value: Value| -> CallResult<()> {
                    let value: V = serde_json::from_value(value)?;
                    set(t, value)
                })),
            },
        )
    }

    /// Callable method.
    pub fn method<R, F>(self, name: &str, f: F) -> Self
    where
        R: Serialize,
        F: Fn(&mut T, &Call) -> CallResult<R> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Member::Method(Box::new(move |t: &mut T, call: &Call| {
                to_value(f(t, call)?)
            })),
        )
    }

    /// Callable method taking the target by shared reference.
    ///
    /// Prefer this for long running calls that don't modify the target:
    /// run through `call_async` on a worker pool, a query leaves the device
    /// free to answer reads while it runs.
    pub fn query<R, F>(self, name: &str, f: F) -> Self
    where
        R: Serialize,
        F: Fn(&T, &Call) -> CallResult<R> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Member::Query(Box::new(move |t: &T, call: &Call| to_value(f(t, call)?))),
        )
    }

    fn insert(mut self, name: &str, member: Member<T>) -> Self {
        if let Err(e) = validate_name(name) {
            self.rejected.push(e);
        } else if self.members.contains_key(name) {
            self.rejected.push(Error::DuplicateMember(name.to_string()));
        } else {
            self.members.insert(name.to_string(), member);
        }
        self
    }
}

impl<T> Exposed<T> {
    pub fn new() -> Self {
        Self {
            members: BTreeMap::new(),
            rejected: Vec::new(),
        }
    }

    /// Fails with the first registration problem, if any.
    pub fn validate(&self) -> Result<()> {
        match self.rejected.first() {
            Some(Error::InvalidMemberName(name)) => {
                Err(Error::InvalidMemberName(name.clone()))
            }
            Some(Error::DuplicateMember(name)) => Err(Error::DuplicateMember(name.clone())),
            Some(e) => Err(Error::Other(e.to_string())),
            None => Ok(()),
        }
    }

    /// Fails if any of `names` is also exposed by this table.
    pub fn check_disjoint(&self, names: &[&str]) -> Result<()> {
        for name in names {
            if self.members.contains_key(*name) {
                return Err(Error::InvalidMemberName(format!(
                    "{} is already provided by the device",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Member<T>> {
        self.members.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn commands(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, m)| m.is_callable())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn attributes(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, m)| !m.is_callable())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.members.keys().map(|n| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('_') {
        return Err(Error::InvalidMemberName(format!(
            "`{}` is not a public name",
            name
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::InvalidMemberName(format!("`{}` is reserved", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CallErrorKind;
    use serde_json::json;

    #[derive(Default)]
    struct Lamp {
        level: u8,
        label: String,
    }

    fn table() -> Exposed<Lamp> {
        Exposed::<Lamp>::new()
            .attribute("level", |l: &Lamp| &l.level, |l: &mut Lamp| &mut l.level)
            .read_only("label", |l: &Lamp| l.label.clone())
            .method("toggle", |l: &mut Lamp, _: &Call| {
                l.level = if l.level > 0 { 0 } else { 255 };
                Ok(l.level)
            })
            .query("brightness", |l: &Lamp, _: &Call| Ok(l.level as f64 / 255.0))
    }

    #[test]
    fn attribute_round_trip() {
        let t = table();
        let mut lamp = Lamp::default();
        match t.get("level").unwrap() {
            Member::Attribute { get, set } => {
                set.as_ref().unwrap()(&mut lamp, json!(42)).unwrap();
                assert_eq!(get(&lamp).unwrap(), json!(42));
            }
            _ => panic!("expected attribute"),
        }
    }

    #[test]
    fn setter_rejects_wrong_type() {
        let t = table();
        let mut lamp = Lamp::default();
        if let Some(Member::Attribute { set: Some(set), .. }) = t.get("level") {
            let err = set(&mut lamp, json!("bright")).unwrap_err();
            assert_eq!(err.kind, CallErrorKind::InvalidArguments);
        } else {
            panic!("expected writable attribute");
        }
    }

    #[test]
    fn lists_split_by_kind() {
        let t = table();
        assert_eq!(t.commands(), vec!["brightness", "toggle"]);
        assert!(t.get("brightness").unwrap().is_callable());
        assert_eq!(t.attributes(), vec!["label", "level"]);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn private_reserved_and_duplicate_names_rejected() {
        let t = Exposed::<Lamp>::new().read_only("_secret", |l: &Lamp| l.level);
        assert!(matches!(t.validate(), Err(Error::InvalidMemberName(_))));

        let t = Exposed::<Lamp>::new().read_only("uptime", |l: &Lamp| l.level);
        assert!(t.validate().is_err());
        assert!(!t.contains("uptime"));

        let t = table().read_only("level", |l: &Lamp| l.level);
        assert!(matches!(t.validate(), Err(Error::DuplicateMember(_))));
    }
}
