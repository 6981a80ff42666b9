//! # Tree futures
//!
//! A [`TreeFuture`] is one resolve or layout computation for a tree. Any number
//! of callers may attach to it and wait; exactly one of them runs the work at
//! a time.
//!
//! Work is resumable: when it notices an interrupt request off the main thread
//! it returns its progress, and whoever waits next (typically the main thread)
//! continues from there instead of starting over.
//!
//! The [`TreeFutureCoordinator`] keeps the in-flight futures of every tree.
//! Submitting work equivalent to an in-flight future attaches to it; submitting
//! different, newer work releases the older futures, whose results are then
//! never delivered.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::context::InterruptToken;
use crate::error::{ComponentError, PipelineError, TreeId};

pub enum Step<T, P> {
    Done(T),
    /// Stopped early; the progress can be handed back to `run` to continue.
    Interrupted(P),
}

/// A unit of resolve or layout work.
pub trait TreeWork: Send + Sync + 'static {
    type Output: Send + Sync + 'static;
    type Progress: Send + 'static;

    fn version(&self) -> u64;

    /// Whether `other` would produce the same result, so a caller submitting
    /// it can share this work instead.
    fn is_equivalent_to(&self, other: &Self) -> bool;

    fn run(
        &self,
        progress: Option<Self::Progress>,
        token: &Arc<InterruptToken>,
    ) -> Result<Step<Self::Output, Self::Progress>, PipelineError>;
}

pub enum FutureResult<T> {
    Completed(Arc<T>),
    /// Stopped at the request of another caller; waiting again resumes it.
    Interrupted,
    /// Superseded or cancelled. The caller should resubmit if it still
    /// needs a result.
    Released,
    Failed(PipelineError),
}

impl<T> FutureResult<T> {
    pub fn completed(self) -> Option<Arc<T>> {
        match self {
            FutureResult::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self, FutureResult::Released)
    }
}

impl<T> std::fmt::Debug for FutureResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FutureResult::Completed(_) => f.write_str("Completed"),
            FutureResult::Interrupted => f.write_str("Interrupted"),
            FutureResult::Released => f.write_str("Released"),
            FutureResult::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Running,
    Interrupted,
    Completed,
    Failed,
    Released,
}

enum Slot<W: TreeWork> {
    Pending,
    Running,
    Interrupted(W::Progress),
    Completed(Arc<W::Output>),
    Failed(PipelineError),
    Released,
}

impl<W: TreeWork> Slot<W> {
    fn state(&self) -> FutureState {
        match self {
            Slot::Pending => FutureState::Pending,
            Slot::Running => FutureState::Running,
            Slot::Interrupted(_) => FutureState::Interrupted,
            Slot::Completed(_) => FutureState::Completed,
            Slot::Failed(_) => FutureState::Failed,
            Slot::Released => FutureState::Released,
        }
    }
}

pub struct TreeFuture<W: TreeWork> {
    id: u64,
    tree_id: TreeId,
    work: W,
    token: Arc<InterruptToken>,
    slot: Mutex<Slot<W>>,
    changed: Condvar,
}

impl<W: TreeWork> TreeFuture<W> {
    pub fn new(id: u64, tree_id: TreeId, work: W, token: Arc<InterruptToken>) -> Self {
        Self {
            id,
            tree_id,
            work,
            token,
            slot: Mutex::new(Slot::Pending),
            changed: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    pub fn version(&self) -> u64 {
        self.work.version()
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    pub fn token(&self) -> &Arc<InterruptToken> {
        &self.token
    }

    pub fn state(&self) -> FutureState {
        self.slot.lock().state()
    }

    pub fn is_released(&self) -> bool {
        self.token.is_released()
    }

    /// Completed, failed or released: nothing left to run.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state(),
            FutureState::Completed | FutureState::Failed | FutureState::Released
        )
    }

    pub fn request_interrupt(&self) {
        self.token.request_interrupt();
    }

    pub fn release(&self) {
        self.token.release();
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending | Slot::Interrupted(_)) {
            *slot = Slot::Released;
        }
        self.changed.notify_all();
    }

    /// Runs the work (or resumes it) if nobody else is, otherwise waits for
    /// the running caller. The main thread asks a background runner to stop
    /// and then continues the work itself.
    pub fn run_and_get(&self) -> FutureResult<W::Output> {
        enum Next {
            Wait,
            Run,
        }

        let mut slot = self.slot.lock();
        loop {
            let next = match &*slot {
                Slot::Completed(v) => return FutureResult::Completed(v.clone()),
                Slot::Failed(e) => return FutureResult::Failed(e.clone()),
                Slot::Released => return FutureResult::Released,
                Slot::Running => Next::Wait,
                Slot::Pending | Slot::Interrupted(_) => Next::Run,
            };

            match next {
                Next::Wait => {
                    if self.token.is_main_thread() && !self.token.is_interrupt_requested() {
                        log::debug!("future {} blocks the main thread; interrupting", self.id);
                        self.token.request_interrupt();
                    }
                    self.changed.wait(&mut slot);
                }
                Next::Run => {
                    if self.token.is_released() {
                        *slot = Slot::Released;
                        self.changed.notify_all();
                        return FutureResult::Released;
                    }
                    let progress = match std::mem::replace(&mut *slot, Slot::Running) {
                        Slot::Interrupted(p) => Some(p),
                        _ => None,
                    };
                    if progress.is_some() {
                        self.token.clear_interrupt();
                    }

                    let outcome = MutexGuard::unlocked(&mut slot, || {
                        catch_unwind(AssertUnwindSafe(|| self.work.run(progress, &self.token)))
                    });

                    *slot = match outcome {
                        _ if self.token.is_released() => Slot::Released,
                        Ok(Ok(Step::Done(out))) => Slot::Completed(Arc::new(out)),
                        Ok(Ok(Step::Interrupted(p))) => Slot::Interrupted(p),
                        Ok(Err(e)) => Slot::Failed(e),
                        Err(payload) => {
                            let err = ComponentError::from_panic(payload);
                            Slot::Failed(PipelineError::Panicked(err.message().to_string()))
                        }
                    };
                    self.changed.notify_all();
                    if matches!(*slot, Slot::Interrupted(_)) {
                        log::debug!("future {} interrupted", self.id);
                        return FutureResult::Interrupted;
                    }
                }
            }
        }
    }
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs background work.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job) -> std::io::Result<()>;
}

/// Spawns one named thread per job.
pub struct ThreadExecutor {
    name: String,
    spawned: AtomicUsize,
}

impl ThreadExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawned: AtomicUsize::new(0),
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) -> std::io::Result<()> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        std::thread::Builder::new()
            .name(format!("{}-{n}", self.name))
            .spawn(job)
            .map(|_| ())
    }
}

/// Runs jobs on the calling thread.
#[derive(Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) -> std::io::Result<()> {
        job();
        Ok(())
    }
}

#[derive(Clone)]
pub enum RunMode {
    /// Runs when a caller waits on the future.
    Sync,
    /// Starts immediately on the executor.
    Async(Arc<dyn Executor>),
}

/// Monotonic version counter; the first version is 1.
#[derive(Debug, Default, Clone)]
pub struct VersionClock {
    last: Arc<AtomicU64>,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

pub struct TreeFutureCoordinator<W: TreeWork> {
    inner: Arc<CoordinatorInner<W>>,
}

impl<W: TreeWork> Clone for TreeFutureCoordinator<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct CoordinatorInner<W: TreeWork> {
    main_thread: ThreadId,
    in_flight: Mutex<HashMap<TreeId, Vec<Arc<TreeFuture<W>>>>>,
    next_id: AtomicU64,
}

impl<W: TreeWork> TreeFutureCoordinator<W> {
    pub fn new(main_thread: ThreadId) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                main_thread,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attaches to an equivalent in-flight future of `tree_id`, or starts a
    /// new one (releasing in-flight futures with a lower version).
    pub fn submit(&self, tree_id: TreeId, work: W, mode: RunMode) -> Arc<TreeFuture<W>> {
        let (future, created) = {
            let mut in_flight = self.inner.in_flight.lock();
            let list = in_flight.entry(tree_id).or_default();
            list.retain(|f| !f.is_finished());

            if let Some(existing) = list
                .iter()
                .find(|f| !f.is_released() && f.work.is_equivalent_to(&work))
            {
                log::trace!(
                    "tree {tree_id}: v{} attaches to future {}",
                    work.version(),
                    existing.id
                );
                (existing.clone(), false)
            } else {
                for stale in list.iter().filter(|f| f.version() < work.version()) {
                    log::debug!("tree {tree_id}: releasing superseded future {}", stale.id);
                    stale.release();
                }
                list.retain(|f| !f.is_released());

                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let token = Arc::new(InterruptToken::new(self.inner.main_thread));
                let future = Arc::new(TreeFuture::new(id, tree_id, work, token));
                list.push(future.clone());
                (future, true)
            }
        };

        if created && let RunMode::Async(executor) = mode {
            let this = self.clone();
            let f = future.clone();
            if let Err(e) = executor.execute(Box::new(move || {
                this.get(&f);
            })) {
                log::error!("failed to schedule future {}: {e}", future.id);
            }
        }
        future
    }

    /// Runs or waits for `future`. Finished futures leave the in-flight table
    /// whatever their outcome.
    pub fn get(&self, future: &Arc<TreeFuture<W>>) -> FutureResult<W::Output> {
        let result = future.run_and_get();
        if future.is_finished() {
            self.untrack(future);
        }
        result
    }

    pub fn request_interrupt(&self, future: &TreeFuture<W>) {
        future.request_interrupt();
    }

    pub fn release(&self, future: &Arc<TreeFuture<W>>) {
        future.release();
        self.untrack(future);
    }

    pub fn release_tree(&self, tree_id: TreeId) {
        let futures = self.inner.in_flight.lock().remove(&tree_id);
        for f in futures.into_iter().flatten() {
            f.release();
        }
    }

    /// Unfinished futures of `tree_id`.
    pub fn in_flight(&self, tree_id: TreeId) -> usize {
        self.inner
            .in_flight
            .lock()
            .get(&tree_id)
            .map_or(0, |l| l.iter().filter(|f| !f.is_finished()).count())
    }

    fn untrack(&self, future: &Arc<TreeFuture<W>>) {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(list) = in_flight.get_mut(&future.tree_id) {
            list.retain(|f| !Arc::ptr_eq(f, future));
            if list.is_empty() {
                in_flight.remove(&future.tree_id);
            }
        }
    }
}
