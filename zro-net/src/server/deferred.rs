//! Asynchronous calls.
//!
//! `call_async` hands out an increasing handle and queues the call. The
//! reactor either runs queued calls itself once they are due, or passes them
//! to a pool of worker threads over a task queue. Workers send completions
//! back over a second channel, so results are only ever written by the
//! reactor.
//!
//! A worker running a method holds the target exclusively until the method
//! returns, and requests touching the target wait for it. Queries only take
//! shared access, so reads keep being answered while they run.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use fnv::{FnvHashMap, FnvHashSet};

use zro_core::{Call, Exposed, RemoteError, Value};

use super::dispatch::invoke;
use crate::{Context, DeviceProxy, ProxyConfig, Result};

/// Delay between submitting an async call and running it.
pub const ASYNC_DELAY: Duration = Duration::from_millis(100);

struct Task {
    handle: u64,
    name: String,
    call: Call,
    due: Instant,
}

struct Completion {
    handle: u64,
    name: String,
    result: std::result::Result<Value, RemoteError>,
}

/// Fixed set of threads executing async calls.
struct WorkerPool {
    tasks: Option<Sender<Task>>,
    completions: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn<T: Send + Sync + 'static>(
        count: usize,
        target: Arc<RwLock<T>>,
        exposed: Arc<Exposed<T>>,
        full_traceback: bool,
    ) -> Result<Self> {
        let (task_sender, task_receiver) = unbounded::<Task>();
        let (completion_sender, completions) = unbounded();
        let mut workers = Vec::with_capacity(count);
        for n in 0..count {
            let tasks = task_receiver.clone();
            let done = completion_sender.clone();
            let target = target.clone();
            let exposed = exposed.clone();
            let handle = std::thread::Builder::new()
                .name(format!("zro-async-{}", n))
                .spawn(move || {
                    for task in tasks.iter() {
                        let now = Instant::now();
                        if task.due > now {
                            std::thread::sleep(task.due - now);
                        }
                        trace!("worker {} running async call {}", n, task.handle);
                        let result =
                            invoke(&target, &exposed, &task.name, &task.call, full_traceback);
                        let completion = Completion {
                            handle: task.handle,
                            name: task.name,
                            result,
                        };
                        if done.send(completion).is_err() {
                            break;
                        }
                    }
                })?;
            workers.push(handle);
        }
        Ok(Self {
            tasks: Some(task_sender),
            completions,
            workers,
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // closing the queue ends the worker loops
        self.tasks.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("async worker panicked");
            }
        }
    }
}

/// Where registered callbacks send results: `(address, method)`.
pub type CallbackTarget = (String, String);

/// Bookkeeping for async calls, owned by the reactor.
pub(crate) struct AsyncCalls {
    next_handle: u64,
    pending: FnvHashSet<u64>,
    abandoned: FnvHashSet<u64>,
    results: FnvHashMap<u64, std::result::Result<Value, RemoteError>>,
    queue: VecDeque<Task>,
    pool: Option<WorkerPool>,
    callbacks: FnvHashMap<String, Vec<CallbackTarget>>,
    callback_timeout: Duration,
}

impl AsyncCalls {
    /// Calls run on the reactor when `workers` is 0.
    pub fn new<T: Send + Sync + 'static>(
        workers: usize,
        target: &Arc<RwLock<T>>,
        exposed: &Arc<Exposed<T>>,
        full_traceback: bool,
        callback_timeout: Duration,
    ) -> Result<Self> {
        let pool = match workers {
            0 => None,
            n => Some(WorkerPool::spawn(
                n,
                target.clone(),
                exposed.clone(),
                full_traceback,
            )?),
        };
        Ok(Self {
            next_handle: 0,
            pending: FnvHashSet::default(),
            abandoned: FnvHashSet::default(),
            results: FnvHashMap::default(),
            queue: VecDeque::new(),
            pool,
            callbacks: FnvHashMap::default(),
            callback_timeout,
        })
    }

    /// Queues a call and returns its handle.
    pub fn submit(&mut self, name: String, call: Call) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.pending.insert(handle);
        let task = Task {
            handle,
            name,
            call,
            due: Instant::now() + ASYNC_DELAY,
        };
        match self.pool.as_ref().and_then(|p| p.tasks.as_ref()) {
            Some(tasks) => {
                if let Err(e) = tasks.send(task) {
                    // workers are gone, fall back to the reactor
                    warn!("async task queue closed, running on the reactor");
                    self.queue.push_back(e.into_inner());
                }
            }
            None => self.queue.push_back(task),
        }
        debug!("scheduled async call {}", handle);
        handle
    }

    /// Runs the queued calls that are due, on the calling thread.
    pub fn run_due<T>(
        &mut self,
        target: &RwLock<T>,
        exposed: &Exposed<T>,
        full_traceback: bool,
        ctx: &Context,
    ) -> usize {
        let now = Instant::now();
        let mut ran = 0;
        while self.queue.front().map(|t| t.due <= now).unwrap_or(false) {
            if let Some(task) = self.queue.pop_front() {
                let result = invoke(target, exposed, &task.name, &task.call, full_traceback);
                self.complete(
                    Completion {
                        handle: task.handle,
                        name: task.name,
                        result,
                    },
                    ctx,
                );
                ran += 1;
            }
        }
        ran
    }

    /// Collects results sent back by the worker pool.
    pub fn harvest(&mut self, ctx: &Context) -> usize {
        let completions: Vec<Completion> = match &self.pool {
            Some(pool) => pool.completions.try_iter().collect(),
            None => return 0,
        };
        let count = completions.len();
        for completion in completions {
            self.complete(completion, ctx);
        }
        count
    }

    fn complete(&mut self, completion: Completion, ctx: &Context) {
        let Completion {
            handle,
            name,
            result,
        } = completion;
        self.pending.remove(&handle);
        if let Err(e) = &result {
            warn!("async call {} failed: {}", handle, e);
        }
        if let (Ok(value), Some(targets)) = (&result, self.callbacks.get(&name)) {
            deliver(ctx, targets.clone(), value.clone(), self.callback_timeout);
        }
        if self.abandoned.remove(&handle) {
            debug!("discarding result of abandoned async call {}", handle);
        } else {
            self.results.insert(handle, result);
        }
    }

    fn issued(&self, handle: u64) -> bool {
        self.pending.contains(&handle) || self.results.contains_key(&handle)
    }

    /// True if the call is still running, false once its result is waiting.
    pub fn is_waiting(&self, handle: u64) -> std::result::Result<bool, RemoteError> {
        if self.results.contains_key(&handle) {
            Ok(false)
        } else if self.pending.contains(&handle) && !self.abandoned.contains(&handle) {
            Ok(true)
        } else {
            Err(RemoteError::handle_unknown(handle))
        }
    }

    /// Returns the stored result, removing it when `clear` is set.
    pub fn take(
        &mut self,
        handle: u64,
        clear: bool,
    ) -> std::result::Result<Value, RemoteError> {
        if self.abandoned.contains(&handle) || !self.issued(handle) {
            return Err(RemoteError::handle_unknown(handle));
        }
        if self.pending.contains(&handle) {
            return Err(RemoteError::handle_not_ready(handle));
        }
        let result = if clear {
            self.results.remove(&handle)
        } else {
            self.results.get(&handle).cloned()
        };
        result.unwrap_or_else(|| Err(RemoteError::handle_unknown(handle)))
    }

    /// Forgets a call. A call that is still running completes but its result
    /// is discarded.
    pub fn abandon(&mut self, handle: u64) -> std::result::Result<(), RemoteError> {
        if self.results.remove(&handle).is_some() {
            return Ok(());
        }
        if self.pending.contains(&handle) && self.abandoned.insert(handle) {
            return Ok(());
        }
        Err(RemoteError::handle_unknown(handle))
    }

    pub fn register_callback(&mut self, method: &str, address: String, dest: String) {
        let targets = self.callbacks.entry(method.to_string()).or_default();
        let entry = (address, dest);
        if !targets.contains(&entry) {
            targets.push(entry);
        }
    }

    pub fn unregister_callback(&mut self, method: &str, address: &str, dest: &str) -> bool {
        match self.callbacks.get_mut(method) {
            Some(targets) => {
                let before = targets.len();
                targets.retain(|(a, d)| !(a == address && d == dest));
                targets.len() != before
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Sends a result to every registered destination from a separate thread,
/// so a destination that is the device itself can't deadlock the reactor.
fn deliver(ctx: &Context, targets: Vec<CallbackTarget>, value: Value, timeout: Duration) {
    let ctx = ctx.clone();
    let spawned = std::thread::Builder::new()
        .name("zro-callback".to_string())
        .spawn(move || {
            let config = ProxyConfig {
                timeout_ms: timeout.as_millis() as u64,
                ..Default::default()
            };
            for (address, method) in targets {
                let outcome = DeviceProxy::with_config(&ctx, &address, config.clone())
                    .and_then(|mut proxy| proxy.call(&method, vec![value.clone()]));
                match outcome {
                    Ok(_) => trace!("delivered async result to {} {}", address, method),
                    Err(e) => error!(
                        "{}",
                        RemoteError::new(zro_core::ErrorCode::CallbackFailed, &method)
                            .with_message(format!("{}: {}", address, e))
                    ),
                }
            }
        });
    if let Err(e) = spawned {
        error!("failed spawning callback thread: {}", e);
    }
}
