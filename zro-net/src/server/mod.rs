//! Remote object server.
//!
//! [`RemoteObjectServer`] binds a reply socket and serves one target object
//! through its capability table. It is a single threaded reactor: requests
//! are handled one at a time, in arrival order, interleaved with servicing
//! the sockets of attached [`Role`]s, running due async calls and firing the
//! periodic update hook.
//!
//! Every request gets exactly one reply. Failures of any kind, including
//! panics inside target methods, are turned into a [`RemoteError`] reply and
//! the reactor keeps serving.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use zro_core::util::suggestion;
use zro_core::{
    to_value, Call, CallError, ErrorCode, Exposed, Member, RemoteError, RemoteObject, Value,
    SET_OK,
};

use crate::auth::AccessList;
use crate::config::ServerConfig;
use crate::device::{role_names, Role};
use crate::msg::request::{GET, IS_CALLABLE, PLATFORM_INFO, RUN, SET};
use crate::msg::{Envelope, GetRequest, IsCallableRequest, Reply, RunRequest, SetRequest};
use crate::platform::PlatformInfo;
use crate::socket::zmq::{readable, rebind, release, swap_bound, try_recv_frames};
use crate::socket::{unpack_detect, Encoding};
use crate::util::resolve_ipv4;
use crate::{Context, Error, Result};

use self::deferred::AsyncCalls;
use self::dispatch::{
    install_panic_hook, invoke, read, try_write_lock, write, write_lock, BUILTIN_ATTRIBUTES,
    BUILTIN_COMMANDS, CLOSE,
};

pub mod deferred;
mod dispatch;

static NEXT_DOMAIN: AtomicU64 = AtomicU64::new(0);

/// How long a closing device keeps trying to deliver its last replies.
const CLOSE_LINGER: Duration = Duration::from_millis(200);

/// Serves `target` on `port` until it's closed remotely.
pub fn serve<T: RemoteObject>(ctx: &Context, target: T, port: Option<u16>) -> Result<()> {
    let config = ServerConfig {
        rep_port: port,
        ..Default::default()
    };
    RemoteObjectServer::new(ctx, target, config)?.run_forever()
}

/// Reply-socket server exposing a target object.
pub struct RemoteObjectServer<T: RemoteObject> {
    ctx: Context,
    config: ServerConfig,
    target: Arc<RwLock<T>>,
    exposed: Arc<Exposed<T>>,
    roles: Vec<Box<dyn Role<T>>>,
    /// Reply socket, gone once the device is closed.
    socket: Option<zmq::Socket>,
    rep_port: u16,
    zap_domain: String,
    access: AccessList,
    calls: AsyncCalls,
    platform: PlatformInfo,
    started: Instant,
    update_interval: Option<Duration>,
    last_update: Instant,
    shutdown: Arc<AtomicBool>,
    closed: bool,
}

impl<T: RemoteObject> RemoteObjectServer<T> {
    /// Builds the capability table of `target` and binds the reply socket.
    pub fn new(ctx: &Context, target: T, config: ServerConfig) -> Result<Self> {
        let exposed = T::expose(Exposed::new());
        exposed.validate()?;
        install_panic_hook();

        let target = Arc::new(RwLock::new(target));
        let exposed = Arc::new(exposed);
        let calls = AsyncCalls::new(
            config.async_workers,
            &target,
            &exposed,
            config.full_traceback,
            Duration::from_millis(config.callback_timeout_ms),
        )?;
        let zap_domain = format!("zro-{}", NEXT_DOMAIN.fetch_add(1, Ordering::Relaxed));
        let socket = ctx.socket(zmq::REP)?;
        let rep_port = rebind(&socket, &config.ip, config.rep_port)?;
        info!("replying on port {}", rep_port);

        let started_at: DateTime<Local> = Local::now();
        Ok(Self {
            ctx: ctx.clone(),
            update_interval: config.update_interval(),
            config,
            target,
            exposed,
            roles: Vec::new(),
            socket: Some(socket),
            rep_port,
            zap_domain,
            access: AccessList::default(),
            calls,
            platform: PlatformInfo::collect(&started_at),
            started: Instant::now(),
            last_update: Instant::now(),
            shutdown: Arc::new(AtomicBool::new(false)),
            closed: false,
        })
    }

    /// Attaches a role. Its member names must not clash with the target's,
    /// the server's or another role's.
    pub fn add_role(&mut self, role: Box<dyn Role<T>>) -> Result<()> {
        let names = role_names(role.as_ref());
        self.exposed.check_disjoint(&names)?;
        for name in &names {
            let taken = BUILTIN_COMMANDS.contains(name)
                || BUILTIN_ATTRIBUTES.contains(name)
                || *name == CLOSE
                || self.roles.iter().any(|r| role_names(r.as_ref()).contains(name));
            if taken {
                return Err(Error::CoreError(zro_core::Error::DuplicateMember(
                    name.to_string(),
                )));
            }
        }
        debug!("attached {} role", role.name());
        self.roles.push(role);
        Ok(())
    }

    pub fn with_role<R: Role<T>>(mut self, role: R) -> Result<Self> {
        self.add_role(Box::new(role))?;
        Ok(self)
    }

    /// First attached role of type `R`.
    pub fn role<R: 'static>(&self) -> Option<&R> {
        self.roles.iter().find_map(|r| r.as_any().downcast_ref::<R>())
    }

    pub fn role_mut<R: 'static>(&mut self) -> Option<&mut R> {
        self.roles
            .iter_mut()
            .find_map(|r| r.as_any_mut().downcast_mut::<R>())
    }

    /// Runs `f` with the target and the first role of type `R`.
    pub fn with_target_and_role<R: 'static, O>(
        &mut self,
        f: impl FnOnce(&mut T, &mut R) -> O,
    ) -> Option<O> {
        let target = self.target.clone();
        let role = self.role_mut::<R>()?;
        let mut target = write_lock(&target);
        Some(f(&mut target, role))
    }

    /// Locks the target for local access.
    pub fn target(&self) -> RwLockWriteGuard<'_, T> {
        write_lock(&self.target)
    }

    pub fn rep_port(&self) -> u16 {
        self.rep_port
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn platform_info(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn update_interval(&self) -> Option<Duration> {
        self.update_interval
    }

    pub fn set_update_interval(&mut self, interval: Option<Duration>) {
        self.update_interval = interval.filter(|d| *d > Duration::from_millis(0));
        self.last_update = Instant::now();
    }

    /// Flag that stops [`run_forever`](Self::run_forever) once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Moves the reply socket to a new ip and port. Requests in flight on
    /// the old socket are dropped. If the new endpoint can't be bound the
    /// device keeps answering on the old one.
    pub fn set_reply_ip(&mut self, ip: &str, port: Option<u16>) -> Result<u16> {
        let fresh = self.ctx.socket(zmq::REP)?;
        if !self.access.is_empty() {
            self.ctx.set_access(&self.zap_domain, self.access.clone())?;
            fresh.set_zap_domain(&self.zap_domain)?;
        }
        let current = self.socket.as_mut().ok_or(Error::Closed)?;
        self.rep_port = swap_bound(current, self.rep_port, fresh, ip, port)?;
        self.config.ip = ip.to_string();
        info!("replying on port {}", self.rep_port);
        Ok(self.rep_port)
    }

    fn rebind_same(&mut self) -> Result<()> {
        let ip = self.config.ip.clone();
        self.set_reply_ip(&ip, Some(self.rep_port))?;
        Ok(())
    }

    /// Only lets the given peers in. Host names are resolved to IPv4. The
    /// reply socket is rebound for the list to take effect.
    pub fn set_allowlist(&mut self, addresses: &[&str]) -> Result<()> {
        self.access.allow = resolve_all(addresses)?;
        self.apply_access()
    }

    /// Keeps the given peers out. Ignored while an allow list is set.
    pub fn set_denylist(&mut self, addresses: &[&str]) -> Result<()> {
        self.access.deny = resolve_all(addresses)?;
        self.apply_access()
    }

    fn apply_access(&mut self) -> Result<()> {
        if self.access.is_empty() {
            self.ctx.clear_access(&self.zap_domain);
        }
        self.rebind_same()
    }

    /// Names of the remote methods, management methods included.
    pub fn command_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .exposed
            .commands()
            .into_iter()
            .chain(self.roles.iter().flat_map(|r| r.commands().iter().copied()))
            .chain(BUILTIN_COMMANDS.iter().copied())
            .map(String::from)
            .collect();
        names.sort();
        names
    }

    /// Names of the remote attributes, management attributes included.
    pub fn attribute_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .exposed
            .attributes()
            .into_iter()
            .chain(self.roles.iter().flat_map(|r| r.attributes().iter().copied()))
            .chain(BUILTIN_ATTRIBUTES.iter().copied())
            .map(String::from)
            .collect();
        names.sort();
        names
    }

    fn all_names(&self) -> Vec<String> {
        let mut names = self.command_list();
        names.extend(self.attribute_list());
        names
    }

    fn unknown(&self, name: &str) -> RemoteError {
        let names = self.all_names();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let err = RemoteError::no_such_attribute(name);
        match suggestion(name, &names) {
            Some(hint) => err.with_message(hint),
            None => err,
        }
    }

    fn role_index(&self, name: &str, commands: bool) -> Option<usize> {
        self.roles.iter().position(|r| {
            if commands {
                r.commands().contains(&name)
            } else {
                r.attributes().contains(&name)
            }
        })
    }

    /// Serves until the device is closed, remotely or through the shutdown
    /// handle.
    pub fn run_forever(&mut self) -> Result<()> {
        info!("serving on port {}", self.rep_port);
        let poll_timeout = Duration::from_millis(self.config.poll_timeout_ms.max(1));
        while !self.closed && !self.shutdown.load(Ordering::SeqCst) {
            self.poll_once(poll_timeout)?;
        }
        self.close();
        Ok(())
    }

    /// Runs one reactor cycle, waiting at most `timeout` for a request.
    pub fn poll_once(&mut self, timeout: Duration) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if readable(self.rep()?, timeout)? {
            while let Some(frames) = try_recv_frames(self.rep()?)? {
                if self.handle_frames(frames) {
                    self.close();
                    return Ok(());
                }
            }
        }
        self.service_roles();
        self.calls
            .run_due(&self.target, &self.exposed, self.config.full_traceback, &self.ctx);
        self.calls.harvest(&self.ctx);
        self.tick();
        Ok(())
    }

    fn rep(&self) -> Result<&zmq::Socket> {
        self.socket.as_ref().ok_or(Error::Closed)
    }

    fn service_roles(&mut self) {
        if self.roles.is_empty() {
            return;
        }
        // a worker busy with the target holds it, try again next cycle
        let mut target = match try_write_lock(&self.target) {
            Some(target) => target,
            None => return,
        };
        for role in self.roles.iter_mut() {
            if let Err(e) = role.service(&mut target) {
                error!("{} role failed servicing its sockets: {}", role.name(), e);
            }
        }
    }

    fn tick(&mut self) {
        let interval = match self.update_interval {
            Some(interval) => interval,
            None => return,
        };
        if self.last_update.elapsed() < interval {
            return;
        }
        let mut target = match try_write_lock(&self.target) {
            Some(target) => target,
            None => return,
        };
        self.last_update = Instant::now();
        target.on_update();
        for role in self.roles.iter_mut() {
            if let Err(e) = role.on_update(&mut target) {
                error!("{} role update failed: {}", role.name(), e);
            }
        }
    }

    /// Handles one request and sends its reply. Returns true if the request
    /// asked the server to close.
    ///
    /// Failing to send a reply is logged, the device keeps serving.
    fn handle_frames(&mut self, frames: Vec<Vec<u8>>) -> bool {
        let mut close_requested = false;
        let (reply, encoding) = match Envelope::from_frames(frames) {
            Ok(envelope) => {
                trace!("request: {}", envelope.message_id);
                self.dispatch(&envelope, &mut close_requested)
            }
            Err(e) => {
                warn!("malformed request: {}", e);
                let err = RemoteError::new(ErrorCode::Unhandled, "request")
                    .with_message(e.to_string());
                (Reply::Error(err), Encoding::default())
            }
        };
        if let Reply::Error(e) = &reply {
            warn!("{}", e);
        }
        let sent = reply.into_envelope(encoding).and_then(|envelope| {
            Ok(self.rep()?.send_multipart(envelope.frames(), 0)?)
        });
        if let Err(e) = sent {
            error!("failed sending reply: {}", e);
        }
        close_requested
    }

    fn dispatch(
        &mut self,
        envelope: &Envelope,
        close_requested: &mut bool,
    ) -> (Reply, Encoding) {
        macro_rules! decode {
            ($ty:ty) => {
                match envelope.unpack_payload::<$ty>() {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        let err = RemoteError::new(ErrorCode::Unhandled, &envelope.message_id)
                            .with_message(e.to_string());
                        return (Reply::Error(err), Encoding::default());
                    }
                }
            };
        }
        match envelope.message_id.as_str() {
            GET => {
                let (req, encoding): (GetRequest, _) = decode!(GetRequest);
                (self.get(&req.name), encoding)
            }
            SET => {
                let (req, encoding): (SetRequest, _) = decode!(SetRequest);
                let reply = self.set(&req.name, req.value).map(|_| Value::from(SET_OK));
                (reply.into(), encoding)
            }
            RUN => {
                let (req, encoding): (RunRequest, _) = decode!(RunRequest);
                let (name, call) = req.into_call();
                if name == CLOSE {
                    *close_requested = true;
                    return (Reply::Value(Value::Null), encoding);
                }
                (self.run(&name, &call).into(), encoding)
            }
            IS_CALLABLE => {
                let (req, encoding): (IsCallableRequest, _) = decode!(IsCallableRequest);
                (self.is_callable(&req.name).map(Value::Bool).into(), encoding)
            }
            PLATFORM_INFO => {
                let encoding = unpack_detect::<Value>(&envelope.payload)
                    .map(|(_, e)| e)
                    .unwrap_or_default();
                let reply = to_value(&self.platform).map_err(|e| e.into_remote(PLATFORM_INFO));
                (reply.into(), encoding)
            }
            other => {
                let encoding = unpack_detect::<Value>(&envelope.payload)
                    .map(|(_, e)| e)
                    .unwrap_or_default();
                let err = RemoteError::new(ErrorCode::Unhandled, other)
                    .with_message("unknown command");
                (Reply::Error(err), encoding)
            }
        }
    }

    fn get(&mut self, name: &str) -> Reply {
        if BUILTIN_COMMANDS.contains(&name) || name == CLOSE {
            return Reply::Callable;
        }
        if BUILTIN_ATTRIBUTES.contains(&name) {
            return self.get_builtin(name).into();
        }
        if self.role_index(name, true).is_some() {
            return Reply::Callable;
        }
        if let Some(idx) = self.role_index(name, false) {
            return self.roles[idx]
                .get(name)
                .map_err(|e| e.into_remote(name))
                .into();
        }
        match read(&self.target, &self.exposed, name) {
            Ok(Some(value)) => Reply::Value(value),
            Ok(None) => Reply::Callable,
            Err(e) if e.code == ErrorCode::NoSuchAttribute && !self.exposed.contains(name) => {
                Reply::Error(self.unknown(name))
            }
            Err(e) => Reply::Error(e),
        }
    }

    fn get_builtin(&self, name: &str) -> std::result::Result<Value, RemoteError> {
        let value = match name {
            "rep_port" => to_value(self.rep_port),
            "uptime" => to_value(self.uptime().as_secs_f64()),
            "platform_info" => to_value(&self.platform),
            "update_interval" => {
                to_value(self.update_interval.map(|d| d.as_millis() as u64).unwrap_or(0))
            }
            _ => return Err(self.unknown(name)),
        };
        value.map_err(|e| e.into_remote(name))
    }

    fn set(&mut self, name: &str, value: Value) -> std::result::Result<(), RemoteError> {
        if name == "update_interval" {
            let ms: u64 = serde_json::from_value(value)
                .map_err(|e| CallError::from(e).into_remote(name))?;
            self.set_update_interval(Some(Duration::from_millis(ms)));
            debug!("update interval set to {} ms", ms);
            return Ok(());
        }
        if BUILTIN_ATTRIBUTES.contains(&name) {
            return Err(
                RemoteError::no_such_attribute(name).with_message("attribute is read-only")
            );
        }
        let is_method = BUILTIN_COMMANDS.contains(&name)
            || name == CLOSE
            || self.role_index(name, true).is_some();
        if is_method {
            return Err(RemoteError::no_such_attribute(name)
                .with_message("methods can't be assigned to"));
        }
        if let Some(idx) = self.role_index(name, false) {
            let role = &mut self.roles[idx];
            if !role.writable().contains(&name) {
                return Err(
                    RemoteError::no_such_attribute(name).with_message("attribute is read-only")
                );
            }
            return role.set(name, value).map_err(|e| e.into_remote(name));
        }
        if !self.exposed.contains(name) {
            return Err(self.unknown(name));
        }
        write(&self.target, &self.exposed, name, value)
    }

    fn is_callable(&self, name: &str) -> std::result::Result<bool, RemoteError> {
        if BUILTIN_COMMANDS.contains(&name) || name == CLOSE {
            return Ok(true);
        }
        if BUILTIN_ATTRIBUTES.contains(&name) {
            return Ok(false);
        }
        if self.role_index(name, true).is_some() {
            return Ok(true);
        }
        if self.role_index(name, false).is_some() {
            return Ok(false);
        }
        match self.exposed.get(name) {
            Some(member) => Ok(member.is_callable()),
            None => Err(self.unknown(name)),
        }
    }

    fn run(&mut self, name: &str, call: &Call) -> std::result::Result<Value, RemoteError> {
        if BUILTIN_COMMANDS.contains(&name) {
            return self.run_builtin(name, call);
        }
        if BUILTIN_ATTRIBUTES.contains(&name) || self.role_index(name, false).is_some() {
            return Err(RemoteError::not_callable(name));
        }
        if let Some(idx) = self.role_index(name, true) {
            let mut target = write_lock(&self.target);
            return self.roles[idx]
                .run(&mut target, name, call)
                .map_err(|e| e.into_remote(name));
        }
        if !self.exposed.contains(name) {
            return Err(self.unknown(name));
        }
        invoke(
            &self.target,
            &self.exposed,
            name,
            call,
            self.config.full_traceback,
        )
    }

    /// Checks that `name` is a method of the target that can be run
    /// asynchronously.
    fn async_method(&self, name: &str) -> std::result::Result<(), RemoteError> {
        match self.exposed.get(name) {
            Some(Member::Method(_)) | Some(Member::Query(_)) => Ok(()),
            Some(Member::Attribute { .. }) => Err(RemoteError::not_callable(name)),
            None if BUILTIN_ATTRIBUTES.contains(&name) => Err(RemoteError::not_callable(name)),
            None => Err(self.unknown(name)),
        }
    }

    fn run_builtin(
        &mut self,
        name: &str,
        call: &Call,
    ) -> std::result::Result<Value, RemoteError> {
        let result = match name {
            "get_command_list" => to_value(self.command_list()),
            "get_attribute_list" => to_value(self.attribute_list()),
            "get_uptime" => to_value(self.uptime().as_secs_f64()),
            "get_platform_info" => to_value(&self.platform),
            "call_async" => {
                let method: String = call
                    .arg(0, "callable_name")
                    .map_err(|e| e.into_remote(name))?;
                self.async_method(&method)?;
                let mut args = call.shifted(1);
                args.kwargs.remove("callable_name");
                to_value(self.calls.submit(method, args))
            }
            "get_async_result" => {
                let handle: u64 = call.arg(0, "handle").map_err(|e| e.into_remote(name))?;
                let clear: bool = call
                    .arg_or(1, "clear", true)
                    .map_err(|e| e.into_remote(name))?;
                return self.calls.take(handle, clear);
            }
            "async_result_waiting" => {
                let handle: u64 = call.arg(0, "handle").map_err(|e| e.into_remote(name))?;
                to_value(self.calls.is_waiting(handle)?)
            }
            "abandon_async_result" => {
                let handle: u64 = call.arg(0, "handle").map_err(|e| e.into_remote(name))?;
                self.calls.abandon(handle)?;
                Ok(Value::Null)
            }
            "register_async_callback" | "unregister_async_callback" => {
                let (method, address, dest) =
                    callback_args(call).map_err(|e| e.into_remote(name))?;
                self.async_method(&method)?;
                if name == "register_async_callback" {
                    self.calls.register_callback(&method, address, dest);
                    Ok(Value::Null)
                } else {
                    to_value(self.calls.unregister_callback(&method, &address, &dest))
                }
            }
            _ => return Err(self.unknown(name)),
        };
        result.map_err(|e| e.into_remote(name))
    }

    /// Runs the close hooks and closes all sockets, freeing their ports.
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("shutting down device on port {}", self.rep_port);
        write_lock(&self.target).on_close();
        for role in self.roles.iter_mut() {
            role.close();
        }
        if let Some(socket) = self.socket.take() {
            release(socket, CLOSE_LINGER);
        }
        self.ctx.clear_access(&self.zap_domain);
    }
}

impl<T: RemoteObject> Drop for RemoteObjectServer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn callback_args(call: &Call) -> std::result::Result<(String, String, String), CallError> {
    Ok((
        call.arg(0, "callable_name")?,
        call.arg(1, "dest_address")?,
        call.arg(2, "dest_callable")?,
    ))
}

fn resolve_all(addresses: &[&str]) -> Result<fnv::FnvHashSet<String>> {
    addresses.iter().map(|a| resolve_ipv4(a)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Stage {
        position: f64,
        moves: u32,
    }

    impl RemoteObject for Stage {
        fn expose(members: Exposed<Self>) -> Exposed<Self> {
            members
                .attribute("position", |s| &s.position, |s| &mut s.position)
                .read_only("moves", |s| s.moves)
                .method("move_by", |s, call| {
                    let delta: f64 = call.arg(0, "delta")?;
                    s.position += delta;
                    s.moves += 1;
                    Ok(s.position)
                })
        }
    }

    fn server() -> RemoteObjectServer<Stage> {
        let config = ServerConfig {
            ip: "127.0.0.1".to_string(),
            ..Default::default()
        };
        RemoteObjectServer::new(&Context::new(), Stage::default(), config).unwrap()
    }

    #[test]
    fn lists_include_management_members() {
        let server = server();
        let commands = server.command_list();
        assert!(commands.contains(&"move_by".to_string()));
        assert!(commands.contains(&"get_async_result".to_string()));
        assert!(!commands.contains(&"close".to_string()));
        let attributes = server.attribute_list();
        assert!(attributes.contains(&"position".to_string()));
        assert!(attributes.contains(&"uptime".to_string()));
    }

    #[test]
    fn dispatch_without_sockets() {
        let mut server = server();
        assert_eq!(server.run("move_by", &Call::positional(vec![json!(2.5)])), Ok(json!(2.5)));
        assert_eq!(server.get("position"), Reply::Value(json!(2.5)));
        assert_eq!(server.get("move_by"), Reply::Callable);
        assert_eq!(server.get("get_uptime"), Reply::Callable);

        let err = server.set("moves", json!(3)).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSuchAttribute);
        let err = server.run("moves", &Call::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotCallable);

        match server.get("positon") {
            Reply::Error(e) => {
                assert_eq!(e.code, ErrorCode::NoSuchAttribute);
                assert!(e.message.unwrap().contains("position"));
            }
            other => panic!("unexpected {:?}", other),
        }

        server.set("update_interval", json!(250)).unwrap();
        assert_eq!(server.update_interval(), Some(Duration::from_millis(250)));
        assert_eq!(server.is_callable("position"), Ok(false));
        assert_eq!(server.is_callable("close"), Ok(true));
    }

    #[test]
    fn closing_frees_the_reply_port() {
        let ctx = Context::new();
        let mut first = server();
        let port = first.rep_port();
        first.close();
        assert!(matches!(first.poll_once(Duration::from_millis(1)), Err(Error::Closed)));

        let config = ServerConfig {
            ip: "127.0.0.1".to_string(),
            rep_port: Some(port),
            ..Default::default()
        };
        let second = RemoteObjectServer::new(&ctx, Stage::default(), config).unwrap();
        assert_eq!(second.rep_port(), port);
        drop(first);
    }

    #[test]
    fn unsendable_reply_keeps_the_device_serving() {
        let mut server = server();
        let request = RunRequest {
            callable: "move_by".to_string(),
            args: vec![json!(1.5)],
            kwargs: Default::default(),
        };
        let envelope = Envelope::from_payload(&request, Encoding::default()).unwrap();
        let frames = envelope.frames().into_iter().map(|f| f.to_vec()).collect();
        // nothing was received on the reply socket, so the reply can't go out
        assert!(!server.handle_frames(frames));
        assert_eq!(server.target().position, 1.5);
        assert!(server.poll_once(Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn async_targets_must_be_methods() {
        let mut server = server();
        let call = Call::positional(vec![json!("position")]);
        let err = server.run("call_async", &call).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotCallable);
        let call = Call::positional(vec![json!("nothing_here")]);
        let err = server.run("call_async", &call).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSuchAttribute);
    }
}
