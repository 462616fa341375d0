mod common;

use std::time::Duration;

use serde_json::json;

use zro_core::{DeviceEntry, ErrorCode};
use zro_net::{Context, DeviceManager, Ping};

use common::{spawn, Camera};

const TIMEOUT: Duration = Duration::from_millis(500);

#[test]
fn devices_resolve_through_registry_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    let camera = spawn(Camera::default());
    let ctx = Context::new();

    {
        let mut manager = DeviceManager::load(&ctx, &path).unwrap();
        assert!(manager.get_device_names().is_empty());
        manager
            .add_device(DeviceEntry::new("camera", "127.0.0.1", camera.port))
            .unwrap();
        manager
            .add_device(DeviceEntry::new("stage", "127.0.0.1", free_port()))
            .unwrap();
    }

    // a fresh manager sees what the first one saved
    let manager = DeviceManager::load(&ctx, &path).unwrap();
    assert_eq!(manager.get_device_names().len(), 2);
    assert_eq!(manager.get_device_info("Camera").unwrap().rep_port, camera.port);

    let mut proxy = manager.get_proxy("camera", TIMEOUT).unwrap();
    proxy.set("gain", 3).unwrap();
    assert_eq!(proxy.get_value("gain").unwrap(), json!(3));

    assert!(manager.device_active("camera", TIMEOUT).unwrap());
    assert!(!manager.device_active("stage", Duration::from_millis(100)).unwrap());
    assert!(manager.get_uptime("camera", TIMEOUT).unwrap() < Duration::from_secs(60));
    let info = manager.get_platform_info("camera", TIMEOUT).unwrap();
    assert_eq!(info.pid, std::process::id());

    let pings = manager
        .ping_all_devices(Duration::from_millis(100), 2)
        .unwrap();
    assert!(pings["camera"].is_reachable());
    assert_eq!(pings["stage"], Ping::Unreachable);

    let err = manager.get_proxy("nothing", TIMEOUT).err().unwrap();
    assert_eq!(err.code(), ErrorCode::RegistryNotFound);
}

#[test]
fn registry_rejects_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context::new();
    let mut manager = DeviceManager::load(&ctx, dir.path().join("reg.json")).unwrap();
    manager
        .add_device(DeviceEntry::new("camera", "10.0.0.5", 5000))
        .unwrap();

    let err = manager
        .add_device(DeviceEntry::new("CAMERA", "10.0.0.6", 5000))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigConflict);
    let err = manager
        .add_device(DeviceEntry::new("stage", "10.0.0.5", 5000))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConfigConflict);

    manager.remove_device("camera").unwrap();
    assert!(!manager.device_exists("camera"));
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
