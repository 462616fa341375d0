#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use zro_core::{CallError, Exposed, RemoteObject};
use zro_net::{Context, DeviceProxy, RemoteObjectServer, Result, ServerConfig};

/// Test device with a few attributes and methods of every flavor.
#[derive(Default)]
pub struct Camera {
    pub exposure: f64,
    pub gain: i64,
    pub frames: u64,
    pub last_callback: Option<serde_json::Value>,
}

impl RemoteObject for Camera {
    fn expose(members: Exposed<Self>) -> Exposed<Self> {
        members
            .attribute("exposure", |c| &c.exposure, |c| &mut c.exposure)
            .attribute("gain", |c| &c.gain, |c| &mut c.gain)
            .read_only("frames", |c| c.frames)
            .read_only("last_callback", |c| c.last_callback.clone())
            .method("acquire", |c, call| {
                let count: u64 = call.arg_or(0, "count", 1)?;
                c.frames += count;
                Ok(c.frames)
            })
            .query("slow", |_, call| {
                let ms: u64 = call.arg(0, "ms")?;
                thread::sleep(Duration::from_millis(ms));
                Ok(ms)
            })
            .method("fail", |_, _| -> std::result::Result<(), CallError> {
                Err(CallError::raised("sensor offline"))
            })
            .method("explode", |_, _| -> std::result::Result<(), CallError> {
                panic!("boom")
            })
            .method("receive", |c, call| {
                let value: serde_json::Value = call.arg(0, "value")?;
                c.last_callback = Some(value);
                Ok(())
            })
    }
}

/// Running server on its own thread.
pub struct Running {
    pub port: u16,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Running {
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn proxy(&self, ctx: &Context) -> DeviceProxy {
        DeviceProxy::connect(ctx, &self.address(), Duration::from_secs(2)).unwrap()
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Starts a server for `target` on an ephemeral port. `setup` runs on the
/// server before it starts serving.
pub fn spawn_with<T, F>(target: T, config: ServerConfig, setup: F) -> Running
where
    T: RemoteObject,
    F: FnOnce(&mut RemoteObjectServer<T>) -> Result<()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let ctx = Context::new();
        let mut server = RemoteObjectServer::new(&ctx, target, config).unwrap();
        setup(&mut server).unwrap();
        tx.send((server.rep_port(), server.shutdown_handle())).unwrap();
        server.run_forever().unwrap();
    });
    let (port, shutdown) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    Running {
        port,
        shutdown,
        handle: Some(handle),
    }
}

pub fn spawn<T: RemoteObject>(target: T) -> Running {
    spawn_with(target, local_config(), |_| Ok(()))
}

pub fn local_config() -> ServerConfig {
    ServerConfig {
        ip: "127.0.0.1".to_string(),
        ..Default::default()
    }
}

/// Polls `check` until it returns true or `timeout` passes.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}
