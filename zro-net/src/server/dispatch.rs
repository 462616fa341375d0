//! Invoking members of the capability table.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Once, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use zro_core::{Call, ErrorCode, Exposed, Member, RemoteError, Value};

/// Management methods answered by the server itself and listed in the
/// command list.
pub(crate) const BUILTIN_COMMANDS: &[&str] = &[
    "abandon_async_result",
    "async_result_waiting",
    "call_async",
    "get_async_result",
    "get_attribute_list",
    "get_command_list",
    "get_platform_info",
    "get_uptime",
    "register_async_callback",
    "unregister_async_callback",
];

/// Management attributes answered by the server itself.
pub(crate) const BUILTIN_ATTRIBUTES: &[&str] =
    &["platform_info", "rep_port", "update_interval", "uptime"];

/// Callable remotely but never listed.
pub(crate) const CLOSE: &str = "close";

thread_local! {
    static LAST_PANIC: RefCell<Option<String>> = RefCell::new(None);
}

static PANIC_HOOK: Once = Once::new();

/// Records the location of panics so `CallRaised` messages can include it.
/// The previously installed hook still runs.
pub(crate) fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                let location = location.to_string();
                LAST_PANIC.with(|last| *last.borrow_mut() = Some(location));
            }
            previous(info);
        }));
    });
}

/// Shared access to the target. A lock poisoned by a panicking method is
/// recovered.
pub(crate) fn read_lock<T>(target: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    target.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write_lock<T>(target: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    target.write().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive access if nobody else holds the target right now.
pub(crate) fn try_write_lock<T>(target: &RwLock<T>) -> Option<RwLockWriteGuard<'_, T>> {
    match target.try_write() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Calls method `name` on the target.
///
/// Methods take the target exclusively, queries share it with readers.
/// A panic inside either is caught and reported as `CallRaised`, the target
/// stays usable afterwards.
pub(crate) fn invoke<T>(
    target: &RwLock<T>,
    exposed: &Exposed<T>,
    name: &str,
    call: &Call,
    full_traceback: bool,
) -> Result<Value, RemoteError> {
    let outcome = match exposed.get(name) {
        Some(Member::Method(method)) => panic::catch_unwind(AssertUnwindSafe(|| {
            let mut target = write_lock(target);
            method(&mut target, call)
        })),
        Some(Member::Query(query)) => {
            panic::catch_unwind(AssertUnwindSafe(|| query(&read_lock(target), call)))
        }
        Some(Member::Attribute { .. }) => return Err(RemoteError::not_callable(name)),
        None => return Err(RemoteError::no_such_attribute(name)),
    };
    match outcome {
        Ok(result) => result.map_err(|e| e.into_remote(name)),
        Err(payload) => Err(panicked(name, payload, full_traceback)),
    }
}

/// Reads attribute `name`, `Ok(None)` when it names a method.
pub(crate) fn read<T>(
    target: &RwLock<T>,
    exposed: &Exposed<T>,
    name: &str,
) -> Result<Option<Value>, RemoteError> {
    match exposed.get(name) {
        Some(Member::Attribute { get, .. }) => {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| get(&read_lock(target))));
            match outcome {
                Ok(result) => result.map(Some).map_err(|e| e.into_remote(name)),
                Err(payload) => Err(panicked(name, payload, false)),
            }
        }
        Some(Member::Method(_)) | Some(Member::Query(_)) => Ok(None),
        None => Err(RemoteError::no_such_attribute(name)),
    }
}

pub(crate) fn write<T>(
    target: &RwLock<T>,
    exposed: &Exposed<T>,
    name: &str,
    value: Value,
) -> Result<(), RemoteError> {
    match exposed.get(name) {
        Some(Member::Attribute { set: Some(set), .. }) => {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| set(&mut write_lock(target), value)));
            match outcome {
                Ok(result) => result.map_err(|e| e.into_remote(name)),
                Err(payload) => Err(panicked(name, payload, false)),
            }
        }
        Some(Member::Attribute { set: None, .. }) => Err(RemoteError::no_such_attribute(name)
            .with_message("attribute is read-only")),
        Some(Member::Method(_)) | Some(Member::Query(_)) => {
            Err(RemoteError::no_such_attribute(name)
                .with_message("methods can't be assigned to"))
        }
        None => Err(RemoteError::no_such_attribute(name)),
    }
}

fn panicked(
    name: &str,
    payload: Box<dyn std::any::Any + Send>,
    full_traceback: bool,
) -> RemoteError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    };
    let location = LAST_PANIC.with(|last| last.borrow_mut().take());
    let message = match (full_traceback, location) {
        (true, Some(location)) => format!("{} (at {})", message, location),
        _ => message,
    };
    RemoteError::new(ErrorCode::CallRaised, name).with_message(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Gauge {
        reading: f64,
    }

    fn table() -> Exposed<Gauge> {
        Exposed::<Gauge>::new()
            .attribute("reading", |g: &Gauge| &g.reading, |g: &mut Gauge| &mut g.reading)
            .method("explode", |_: &mut Gauge, _: &Call| -> Result<(), zro_core::CallError> {
                panic!("sensor on fire")
            })
            .method("double", |g: &mut Gauge, _: &Call| Ok(g.reading * 2.0))
            .query("settle", |g: &Gauge, call: &Call| {
                let ms: u64 = call.arg(0, "ms")?;
                std::thread::sleep(std::time::Duration::from_millis(ms));
                Ok(g.reading)
            })
    }

    #[test]
    fn panics_become_call_raised() {
        install_panic_hook();
        let target = RwLock::new(Gauge::default());
        let exposed = table();
        let err = invoke(&target, &exposed, "explode", &Call::default(), true).unwrap_err();
        assert_eq!(err.code, ErrorCode::CallRaised);
        let message = err.message.unwrap();
        assert!(message.contains("sensor on fire"));
        assert!(message.contains("dispatch.rs"));

        // poisoned lock is recovered
        write(&target, &exposed, "reading", json!(1.5)).unwrap();
        let v = invoke(&target, &exposed, "double", &Call::default(), false).unwrap();
        assert_eq!(v, json!(3.0));
    }

    #[test]
    fn kinds_are_checked() {
        let target = RwLock::new(Gauge::default());
        let exposed = table();
        let err = invoke(&target, &exposed, "reading", &Call::default(), false).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotCallable);
        assert_eq!(read(&target, &exposed, "double").unwrap(), None);
        let err = write(&target, &exposed, "double", json!(1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSuchAttribute);
        let err = read(&target, &exposed, "missing").unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSuchAttribute);
    }

    #[test]
    fn queries_share_the_target_with_readers() {
        let target = std::sync::Arc::new(RwLock::new(Gauge { reading: 4.0 }));
        let exposed = std::sync::Arc::new(table());
        let (t, e) = (target.clone(), exposed.clone());
        let running = std::thread::spawn(move || {
            invoke(&t, &e, "settle", &Call::positional(vec![json!(300)]), false)
        });
        std::thread::sleep(std::time::Duration::from_millis(50));

        let started = std::time::Instant::now();
        assert_eq!(read(&target, &exposed, "reading").unwrap(), Some(json!(4.0)));
        assert!(started.elapsed() < std::time::Duration::from_millis(200));
        // exclusive access has to wait for the query
        assert!(try_write_lock(&target).is_none());

        assert_eq!(running.join().unwrap(), Ok(json!(4.0)));
        assert!(try_write_lock(&target).is_some());
    }
}
