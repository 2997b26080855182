//! Single background worker that serializes icon resolution.
//!
//! Callers on any thread submit requests without blocking. One dedicated
//! thread drains a FIFO queue and runs every job to completion before
//! taking the next, so decodes never overlap. A job that panics is logged
//! and dropped; the worker keeps going.
//!
//! Results reach the caller through an [`Executor`], which decides where
//! the completion callback runs. [`Inline`] runs it on the worker thread;
//! a UI layer typically passes a [`Sender`] that its own loop drains.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::config::ResolverConfig;
use crate::resolver::{IconRequest, IconResolver};
use crate::shortcut::IconLocation;
use crate::utils::image_utils::ResolvedIcon;

/// A unit of work for the queue or for an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where completion callbacks run.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs callbacks directly on the worker thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job();
    }
}

/// Hands callbacks to whoever drains the receiving end.
impl Executor for Sender<Job> {
    fn execute(&self, job: Job) {
        if self.send(job).is_err() {
            debug!("callback receiver is gone, dropping result");
        }
    }
}

struct DispatcherState {
    running: AtomicBool,
    pending: AtomicUsize,
}

/// A job counted in `pending` until it leaves the queue, run or dropped.
struct Queued {
    job: Option<Job>,
    state: Arc<DispatcherState>,
}

impl Queued {
    fn new(job: Job, state: Arc<DispatcherState>) -> Self {
        state.pending.fetch_add(1, Ordering::AcqRel);
        Self {
            job: Some(job),
            state,
        }
    }

    fn run(mut self) {
        if let Some(job) = self.job.take() {
            run_guarded(job);
        }
    }
}

impl Drop for Queued {
    fn drop(&mut self) {
        self.state.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Task {
    Run(Queued),
    Shutdown,
}

/// Queues icon requests onto one worker thread.
pub struct IconDispatcher {
    resolver: Arc<IconResolver>,
    executor: Arc<dyn Executor>,
    sender: Sender<Task>,
    handle: Mutex<Option<JoinHandle<()>>>,
    state: Arc<DispatcherState>,
}

impl IconDispatcher {
    /// Native platform, callbacks delivered on the worker thread.
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_resolver(IconResolver::new(config))
    }

    pub fn with_resolver(resolver: IconResolver) -> Self {
        Self::with_executor(resolver, Arc::new(Inline))
    }

    /// Starts the worker thread immediately.
    pub fn with_executor(resolver: IconResolver, executor: Arc<dyn Executor>) -> Self {
        let (sender, receiver) = unbounded();
        let state = Arc::new(DispatcherState {
            running: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
        });

        let thread_state = state.clone();
        let handle = thread::Builder::new()
            .name(resolver.config().worker_name.clone())
            .spawn(move || {
                #[cfg(windows)]
                let _apartment = crate::utils::com::ComApartment::enter();
                worker_loop(receiver);
                thread_state.running.store(false, Ordering::Release);
            })
            .expect("failed to spawn icon worker thread");

        Self {
            resolver: Arc::new(resolver),
            executor,
            sender,
            handle: Mutex::new(Some(handle)),
            state,
        }
    }

    pub fn resolver(&self) -> &IconResolver {
        &self.resolver
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Jobs queued or in progress.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Queues arbitrary work behind every earlier job. Never blocks.
    ///
    /// Returns `false` once the dispatcher has been shut down.
    pub fn enqueue<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_running() {
            return false;
        }
        let queued = Queued::new(Box::new(work), self.state.clone());
        self.sender.send(Task::Run(queued)).is_ok()
    }

    /// Resolves `path` in the background and hands the glyph to `callback`
    /// through the executor. Nothing is delivered when every stage fails.
    ///
    /// Blank paths are ignored and return `false`.
    pub fn request_icon<C>(
        &self,
        path: impl AsRef<Path>,
        icon_override: Option<IconLocation>,
        callback: C,
    ) -> bool
    where
        C: FnOnce(ResolvedIcon) + Send + 'static,
    {
        let path = path.as_ref();
        if path.to_string_lossy().trim().is_empty() {
            return false;
        }

        let request = IconRequest {
            path: PathBuf::from(path),
            icon_override,
        };
        let resolver = self.resolver.clone();
        let executor = self.executor.clone();
        self.enqueue(move || match resolver.resolve(&request) {
            Some(icon) => executor.execute(Box::new(move || callback(icon))),
            None => debug!(path = %request.path.display(), "no icon resolved"),
        })
    }

    /// Decodes a user-chosen icon file on the calling thread.
    pub fn load_icon_sync(&self, path: impl AsRef<Path>) -> Option<ResolvedIcon> {
        self.resolver.load_icon_sync(path.as_ref())
    }

    /// Stops accepting work. Jobs already queued still run.
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::Release);
        let _ = self.sender.send(Task::Shutdown);
    }

    /// Stops and waits for the queue to drain.
    ///
    /// Returns `false` if the worker was already joined.
    pub fn shutdown(&self) -> bool {
        self.stop();
        match self.handle.lock().take() {
            Some(handle) => handle.join().is_ok(),
            None => false,
        }
    }
}

impl Drop for IconDispatcher {
    fn drop(&mut self) {
        // don't block in drop
        self.stop();
    }
}

fn worker_loop(receiver: Receiver<Task>) {
    for task in receiver.iter() {
        match task {
            Task::Run(queued) => queued.run(),
            Task::Shutdown => break,
        }
    }

    // jobs that passed the running check while shutdown was in flight
    let late = receiver
        .try_iter()
        .filter_map(|task| match task {
            Task::Run(queued) => Some(queued),
            Task::Shutdown => None,
        })
        .map(Queued::run)
        .count();
    if late > 0 {
        debug!(late, "ran jobs queued behind shutdown");
    }
    trace!("icon worker exiting");
}

fn run_guarded(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        error!(panic = panic_message(&*payload), "icon job panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
