mod common;

use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use zro_core::{ErrorCode, Kwargs};
use zro_net::{Attribute, Context, DeviceProxy, Encoding, Error};

use common::{local_config, spawn, spawn_with, wait_for, Camera};

fn code(err: Error) -> ErrorCode {
    err.code()
}

#[test]
fn set_then_get() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    proxy.set("exposure", 0.25).unwrap();
    assert_eq!(proxy.get_value("exposure").unwrap(), json!(0.25));

    // same device, other encoding
    proxy.set_encoding(Encoding::Json);
    proxy.set("gain", 4).unwrap();
    assert_eq!(proxy.get_as::<i64>("gain").unwrap(), 4);
    assert_eq!(proxy.get_as::<f64>("exposure").unwrap(), 0.25);
}

#[test]
fn wrong_type_is_rejected_and_value_kept() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    proxy.set("gain", 2).unwrap();
    let err = proxy.set("gain", "high").unwrap_err();
    assert_eq!(code(err), ErrorCode::ArgumentsInvalid);
    assert_eq!(proxy.get_as::<i64>("gain").unwrap(), 2);
}

#[test]
fn unknown_member_keeps_server_alive() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    let err = proxy.get_value("exposur").unwrap_err();
    let remote = err.remote().cloned().unwrap();
    assert_eq!(remote.code, ErrorCode::NoSuchAttribute);
    assert!(remote.message.unwrap_or_default().contains("exposure"));

    assert_eq!(code(proxy.call("no_such", vec![]).unwrap_err()), ErrorCode::NoSuchAttribute);
    assert_eq!(code(proxy.set("no_such", 1).unwrap_err()), ErrorCode::NoSuchAttribute);

    // still serving
    assert_eq!(proxy.call("acquire", vec![json!(3)]).unwrap(), json!(3));
}

#[test]
fn member_kinds() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    match proxy.get("acquire").unwrap() {
        Attribute::Method(bound) => assert_eq!(bound.call(vec![json!(2)]).unwrap(), json!(2)),
        Attribute::Value(v) => panic!("got value {}", v),
    }
    assert!(proxy.is_callable("acquire").unwrap());
    assert!(!proxy.is_callable("frames").unwrap());

    assert_eq!(code(proxy.call("frames", vec![]).unwrap_err()), ErrorCode::NotCallable);
    assert_eq!(code(proxy.set("frames", 10).unwrap_err()), ErrorCode::NoSuchAttribute);
    assert_eq!(code(proxy.set("acquire", 10).unwrap_err()), ErrorCode::NoSuchAttribute);

    let mut kwargs = Kwargs::new();
    kwargs.insert("count".to_string(), json!(5));
    assert_eq!(proxy.call_with("acquire", vec![], kwargs).unwrap(), json!(7));
    assert_eq!(
        code(proxy.call("acquire", vec![json!("lots")]).unwrap_err()),
        ErrorCode::ArgumentsInvalid
    );
}

#[test]
fn raised_and_panicking_methods() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    let err = proxy.call("fail", vec![]).unwrap_err();
    let remote = err.remote().cloned().unwrap();
    assert_eq!(remote.code, ErrorCode::CallRaised);
    assert!(remote.message.unwrap_or_default().contains("sensor offline"));

    let err = proxy.call("explode", vec![]).unwrap_err();
    assert_eq!(code(err), ErrorCode::CallRaised);
    assert_eq!(proxy.call("acquire", vec![]).unwrap(), json!(1));
}

#[test]
fn introspection() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    let commands = proxy.command_list().unwrap();
    assert!(commands.contains(&"acquire".to_string()));
    assert!(commands.contains(&"call_async".to_string()));
    let attributes = proxy.attribute_list().unwrap();
    assert!(attributes.contains(&"exposure".to_string()));
    assert!(attributes.contains(&"platform_info".to_string()));

    assert_eq!(proxy.rep_port().unwrap(), server.port);
    let info = proxy.platform_info().unwrap();
    assert_eq!(info.pid, std::process::id());
    assert!(proxy.uptime().unwrap() < Duration::from_secs(60));
    assert!(proxy.ping().unwrap() < Duration::from_secs(2));
}

#[test]
fn async_call_lifecycle() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    let handle = proxy.call_async("acquire", vec![json!(4)], Kwargs::new()).unwrap();
    let err = proxy.get_async_result(handle, true).unwrap_err();
    assert_eq!(code(err), ErrorCode::HandleNotReady);

    assert!(wait_for(Duration::from_secs(2), || {
        !proxy.async_result_waiting(handle).unwrap()
    }));
    assert_eq!(proxy.get_async_result(handle, false).unwrap(), json!(4));
    assert_eq!(proxy.get_async_result(handle, true).unwrap(), json!(4));
    let err = proxy.get_async_result(handle, true).unwrap_err();
    assert_eq!(code(err), ErrorCode::HandleUnknown);
}

#[test]
fn async_call_on_worker_pool() {
    let config = zro_net::ServerConfig {
        async_workers: 2,
        ..local_config()
    };
    let server = spawn_with(Camera::default(), config, |_| Ok(()));
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    let slow = proxy.call_async("slow", vec![json!(300)], Kwargs::new()).unwrap();
    let fast = proxy.call_async("acquire", vec![], Kwargs::new()).unwrap();
    assert_ne!(slow, fast);

    // answered at the latest once `acquire` has run
    assert_eq!(proxy.get_value("gain").unwrap(), json!(0));
    assert!(wait_for(Duration::from_secs(3), || {
        !proxy.async_result_waiting(slow).unwrap()
    }));
    assert_eq!(proxy.get_async_result(slow, true).unwrap(), json!(300));
    assert_eq!(proxy.get_async_result(fast, true).unwrap(), json!(1));
}

#[test]
fn reads_answered_while_a_worker_runs_a_query() {
    let config = zro_net::ServerConfig {
        async_workers: 1,
        ..local_config()
    };
    let server = spawn_with(Camera::default(), config, |_| Ok(()));
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    let slow = proxy.call_async("slow", vec![json!(1500)], Kwargs::new()).unwrap();
    thread::sleep(Duration::from_millis(300));

    let mut reader = DeviceProxy::connect(&ctx, &server.address(), Duration::from_millis(400)).unwrap();
    let started = Instant::now();
    assert_eq!(reader.get_value("gain").unwrap(), json!(0));
    assert_eq!(reader.get_value("frames").unwrap(), json!(0));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(proxy.async_result_waiting(slow).unwrap());

    assert!(wait_for(Duration::from_secs(4), || {
        !proxy.async_result_waiting(slow).unwrap()
    }));
    assert_eq!(proxy.get_async_result(slow, true).unwrap(), json!(1500));
}

#[test]
fn abandoned_results_are_dropped() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    let handle = proxy.call_async("acquire", vec![], Kwargs::new()).unwrap();
    proxy.abandon_async_result(handle).unwrap();
    thread::sleep(Duration::from_millis(300));
    let err = proxy.get_async_result(handle, true).unwrap_err();
    assert_eq!(code(err), ErrorCode::HandleUnknown);
    // the call itself still ran
    assert_eq!(proxy.get_value("frames").unwrap(), json!(1));

    let err = proxy.call_async("frames", vec![], Kwargs::new()).unwrap_err();
    assert_eq!(code(err), ErrorCode::NotCallable);
}

#[test]
fn async_results_reach_registered_callback() {
    let receiver = spawn(Camera::default());
    let sender = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = sender.proxy(&ctx);
    let mut other = receiver.proxy(&ctx);

    proxy
        .register_async_callback("acquire", &receiver.address(), "receive")
        .unwrap();
    proxy.call_async("acquire", vec![json!(9)], Kwargs::new()).unwrap();
    assert!(wait_for(Duration::from_secs(3), || {
        other.get_value("last_callback").unwrap() == json!(9)
    }));

    assert!(proxy
        .unregister_async_callback("acquire", &receiver.address(), "receive")
        .unwrap());
    assert!(!proxy
        .unregister_async_callback("acquire", &receiver.address(), "receive")
        .unwrap());
}

#[test]
fn proxy_recovers_after_timeout() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy =
        DeviceProxy::connect(&ctx, &server.address(), Duration::from_millis(100)).unwrap();

    let err = proxy.call("slow", vec![json!(500)]).unwrap_err();
    assert!(matches!(err, Error::Unreachable(_)));
    assert_eq!(err.code(), ErrorCode::Unreachable);

    thread::sleep(Duration::from_millis(600));
    proxy.set_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(proxy.call("acquire", vec![]).unwrap(), json!(1));
}

#[test]
fn update_hook_interval_is_remote_settable() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);

    assert_eq!(proxy.get_value("update_interval").unwrap(), json!(0));
    proxy.set("update_interval", 50).unwrap();
    assert_eq!(proxy.get_value("update_interval").unwrap(), json!(50));
}

#[test]
fn allow_and_deny_lists() {
    let server = spawn_with(Camera::default(), local_config(), |s| {
        s.set_allowlist(&["10.255.255.1"])
    });
    let ctx = Context::new();
    let mut proxy =
        DeviceProxy::connect(&ctx, &server.address(), Duration::from_millis(300)).unwrap();
    assert!(matches!(proxy.ping(), Err(Error::Unreachable(_))));
    server.stop();

    let server = spawn_with(Camera::default(), local_config(), |s| {
        s.set_denylist(&["localhost"])
    });
    let mut proxy =
        DeviceProxy::connect(&ctx, &server.address(), Duration::from_millis(300)).unwrap();
    assert!(matches!(proxy.ping(), Err(Error::Unreachable(_))));
    server.stop();

    let server = spawn_with(Camera::default(), local_config(), |s| {
        s.set_allowlist(&["127.0.0.1"])
    });
    let mut proxy = server.proxy(&ctx);
    assert!(proxy.ping().is_ok());
}

#[test]
fn remote_close_stops_server() {
    let server = spawn(Camera::default());
    let ctx = Context::new();
    let mut proxy = server.proxy(&ctx);
    proxy.close_remote().unwrap();

    let mut proxy =
        DeviceProxy::connect(&ctx, &server.address(), Duration::from_millis(200)).unwrap();
    assert!(matches!(proxy.ping(), Err(Error::Unreachable(_))));
}
