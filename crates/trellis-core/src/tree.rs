//! # Render tree
//!
//! [`RenderTree`] is the host of one logical tree. It owns the tree's state,
//! event handlers and the last committed [`ResolveResult`] and
//! [`LayoutState`], and runs the pipeline when asked to:
//!
//! ```text
//! inputs ──resolve──▶ ResolveResult ──commit──▶ state, handlers
//!                          │
//!                          └──layout──▶ LayoutState ──commit──▶ listeners (mount)
//! ```
//!
//! Resolve and layout each go through a [`TreeFutureCoordinator`], so
//! concurrent renders with the same inputs share one computation and a render
//! that the main thread waits on is finished by the main thread.
//!
//! Every commit is checked against what is already committed: a result older
//! than the committed one, or from a released tree, is dropped.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use crate::component::Element;
use crate::config::TreeConfig;
use crate::error::{PipelineError, TreeId};
use crate::events::{EventHandler, EventHandlersController};
use crate::future::{
    Executor, FutureResult, RunMode, ThreadExecutor, TreeFutureCoordinator, VersionClock,
};
use crate::layout::{LayoutState, LayoutWork};
use crate::perf::{PerfEvent, PerfLogger, PerfSpan};
use crate::resolve::{ResolveResult, ResolveWork};
use crate::size_spec::SizeSpec;
use crate::state::{StateKey, StateUpdater, TreeState, UpdateMode};
use crate::tree_props::TreePropContainer;

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

pub type CommitListener = Arc<dyn Fn(&Arc<LayoutState>) + Send + Sync>;

#[derive(Clone, Debug)]
pub enum RenderOutcome {
    Committed(Arc<LayoutState>),
    /// Nothing changed since the last commit.
    Unchanged(Arc<LayoutState>),
    /// Superseded by newer work or the tree was released.
    Discarded,
    /// Stopped so another caller (the main thread) could finish the work.
    Interrupted,
}

impl RenderOutcome {
    pub fn layout(&self) -> Option<&Arc<LayoutState>> {
        match self {
            RenderOutcome::Committed(l) | RenderOutcome::Unchanged(l) => Some(l),
            RenderOutcome::Discarded | RenderOutcome::Interrupted => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, RenderOutcome::Committed(_))
    }
}

struct Inputs {
    root: Option<Element>,
    width: SizeSpec,
    height: SizeSpec,
    tree_props: TreePropContainer,
}

#[derive(Default)]
struct Committed {
    resolve: Option<Arc<ResolveResult>>,
    layout: Option<Arc<LayoutState>>,
}

struct TreeInner {
    id: TreeId,
    config: TreeConfig,
    state: Arc<TreeState>,
    clock: VersionClock,
    resolver: TreeFutureCoordinator<ResolveWork>,
    layouter: TreeFutureCoordinator<LayoutWork>,
    inputs: Mutex<Inputs>,
    committed: RwLock<Committed>,
    /// Serialises commits.
    publish: Mutex<()>,
    notifier: Notifier,
    handlers: EventHandlersController,
    executor: Arc<dyn Executor>,
    main_thread: ThreadId,
    /// Runs commit notifications on the main thread.
    poster: Option<Arc<dyn Executor>>,
    logger: Option<Arc<dyn PerfLogger>>,
    released: AtomicBool,
}

/// Handle to one logical tree. Clones share the tree.
#[derive(Clone)]
pub struct RenderTree {
    inner: Arc<TreeInner>,
}

pub struct RenderTreeBuilder {
    config: TreeConfig,
    executor: Option<Arc<dyn Executor>>,
    poster: Option<Arc<dyn Executor>>,
    logger: Option<Arc<dyn PerfLogger>>,
    main_thread: Option<ThreadId>,
}

impl RenderTreeBuilder {
    /// Where background renders run. Defaults to a [`ThreadExecutor`] named
    /// after `TreeConfig::worker_thread_name`.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Posts jobs to the main thread's loop. Layouts committed on any other
    /// thread reach the commit listeners through it; without one, listeners
    /// run on the committing thread.
    pub fn main_thread_poster(mut self, poster: Arc<dyn Executor>) -> Self {
        self.poster = Some(poster);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn PerfLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The thread that never yields to interrupts. Defaults to the thread
    /// calling `build`.
    pub fn main_thread(mut self, id: ThreadId) -> Self {
        self.main_thread = Some(id);
        self
    }

    pub fn build(self) -> RenderTree {
        let main_thread = self.main_thread.unwrap_or_else(|| thread::current().id());
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ThreadExecutor::new(self.config.worker_thread_name.clone())));
        let inner = Arc::new(TreeInner {
            id: NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(TreeState::new()),
            clock: VersionClock::new(),
            resolver: TreeFutureCoordinator::new(main_thread),
            layouter: TreeFutureCoordinator::new(main_thread),
            inputs: Mutex::new(Inputs {
                root: None,
                width: SizeSpec::Unspecified,
                height: SizeSpec::Unspecified,
                tree_props: TreePropContainer::new(),
            }),
            committed: RwLock::new(Committed::default()),
            publish: Mutex::new(()),
            notifier: Notifier::default(),
            handlers: EventHandlersController::new(),
            executor,
            main_thread,
            poster: self.poster,
            logger: self.logger,
            released: AtomicBool::new(false),
            config: self.config,
        });

        if inner.config.render_on_state_update {
            let weak = Arc::downgrade(&inner);
            inner
                .state
                .set_update_listener(move |mode| on_state_update(&weak, mode));
        }
        log::debug!("created tree {}", inner.id);
        RenderTree { inner }
    }
}

fn on_state_update(tree: &Weak<TreeInner>, mode: UpdateMode) {
    let Some(inner) = tree.upgrade() else {
        return;
    };
    if inner.inputs.lock().root.is_none() {
        return;
    }
    let result = match mode {
        UpdateMode::Sync => inner.render().map(|_| ()),
        UpdateMode::Async => TreeInner::schedule(&inner, None),
        UpdateMode::Lazy => Ok(()),
    };
    if let Err(e) = result {
        log::warn!("tree {}: render after state update failed: {e}", inner.id);
    }
}

impl RenderTree {
    pub fn new(config: TreeConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: TreeConfig) -> RenderTreeBuilder {
        RenderTreeBuilder {
            config,
            executor: None,
            poster: None,
            logger: None,
            main_thread: None,
        }
    }

    pub fn id(&self) -> TreeId {
        self.inner.id
    }

    pub fn config(&self) -> &TreeConfig {
        &self.inner.config
    }

    pub fn set_root(&self, root: Element) {
        self.inner.inputs.lock().root = Some(root);
    }

    pub fn set_size_specs(&self, width: SizeSpec, height: SizeSpec) {
        let mut inputs = self.inner.inputs.lock();
        inputs.width = width;
        inputs.height = height;
    }

    /// Tree props every component of the tree sees.
    pub fn set_tree_props(&self, props: TreePropContainer) {
        self.inner.inputs.lock().tree_props = props;
    }

    /// Resolves and lays out the current inputs on the calling thread and
    /// commits the result.
    pub fn render_sync(&self) -> Result<RenderOutcome, PipelineError> {
        self.inner.render()
    }

    /// Renders on the executor; `on_done` runs on the executor thread with the
    /// outcome.
    pub fn render_async(
        &self,
        on_done: impl FnOnce(Result<RenderOutcome, PipelineError>) + Send + 'static,
    ) -> Result<(), PipelineError> {
        TreeInner::schedule(&self.inner, Some(Box::new(on_done)))
    }

    /// Renders on the executor when the tree is configured for background
    /// work, otherwise on the calling thread.
    pub fn request_render(&self) -> Result<Option<RenderOutcome>, PipelineError> {
        if self.inner.config.background {
            TreeInner::schedule(&self.inner, None).map(|_| None)
        } else {
            self.inner.render().map(Some)
        }
    }

    pub fn state(&self) -> &Arc<TreeState> {
        &self.inner.state
    }

    /// Updater for a state slot, for code outside a render.
    pub fn state_updater<T: Any + Send + Sync>(&self, key: StateKey) -> StateUpdater<T> {
        StateUpdater::new(key, self.inner.state.clone())
    }

    pub fn committed_resolve(&self) -> Option<Arc<ResolveResult>> {
        self.inner.committed.read().resolve.clone()
    }

    pub fn committed_layout(&self) -> Option<Arc<LayoutState>> {
        self.inner.committed.read().layout.clone()
    }

    /// Called with every newly committed layout, in version order, on the
    /// main thread when the tree has a main-thread poster. A layout that is
    /// superseded while listeners run is not delivered to the remaining ones.
    pub fn add_commit_listener(&self, listener: impl Fn(&Arc<LayoutState>) + Send + Sync + 'static) {
        self.inner.notifier.listeners.write().push(Arc::new(listener));
    }

    /// Runs the latest callback bound to `handler`.
    pub fn dispatch<E: Any>(&self, handler: &EventHandler, event: &E) -> bool {
        self.inner.handlers.dispatch(handler, event)
    }

    pub fn handlers(&self) -> &EventHandlersController {
        &self.inner.handlers
    }

    /// Stops all work for this tree. Results still in flight are dropped.
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Unfinished (resolve, layout) futures.
    pub fn in_flight(&self) -> (usize, usize) {
        (
            self.inner.resolver.in_flight(self.inner.id),
            self.inner.layouter.in_flight(self.inner.id),
        )
    }
}

type DoneCallback = Box<dyn FnOnce(Result<RenderOutcome, PipelineError>) + Send>;

#[derive(Clone, Default)]
struct Notifier {
    /// Version of the last layout handed to listeners.
    notified: Arc<Mutex<u64>>,
    listeners: Arc<RwLock<Vec<CommitListener>>>,
}

impl Notifier {
    /// Listeners may commit again from inside the call, so no lock is held
    /// while they run.
    fn notify(&self, state: &Arc<LayoutState>) {
        {
            let mut notified = self.notified.lock();
            if *notified >= state.version() {
                return;
            }
            *notified = state.version();
        }
        let listeners = self.listeners.read().clone();
        for l in listeners {
            if *self.notified.lock() != state.version() {
                break;
            }
            l(state);
        }
    }
}

impl TreeInner {
    fn schedule(this: &Arc<Self>, on_done: Option<DoneCallback>) -> Result<(), PipelineError> {
        if this.released.load(Ordering::Acquire) {
            return Err(PipelineError::TreeReleased(this.id));
        }
        let inner = this.clone();
        this.executor
            .execute(Box::new(move || {
                let result = inner.render();
                match on_done {
                    Some(f) => f(result),
                    None => {
                        if let Err(e) = result {
                            log::warn!("tree {}: background render failed: {e}", inner.id);
                        }
                    }
                }
            }))
            .map_err(|e| PipelineError::Schedule(e.to_string()))
    }

    fn render(&self) -> Result<RenderOutcome, PipelineError> {
        if self.released.load(Ordering::Acquire) {
            return Err(PipelineError::TreeReleased(self.id));
        }
        let (root, width, height, props) = {
            let inputs = self.inputs.lock();
            let root = inputs
                .root
                .clone()
                .ok_or(PipelineError::MissingContext("root component"))?;
            (root, inputs.width, inputs.height, inputs.tree_props.clone())
        };

        match self.resolve(root, props)? {
            Ok(resolve) => self.layout(resolve, width, height),
            Err(outcome) => Ok(outcome),
        }
    }

    /// The committed resolve if the inputs did not change, otherwise a new
    /// one. `Err` carries the outcome when there is nothing to lay out.
    fn resolve(
        &self,
        root: Element,
        props: TreePropContainer,
    ) -> Result<Result<Arc<ResolveResult>, RenderOutcome>, PipelineError> {
        let previous = self.committed.read().resolve.clone();
        if let Some(prev) = &previous
            && prev.root().id() == root.id()
            && prev.tree_props() == &props
            && !self.state.has_pending()
        {
            return Ok(Ok(prev.clone()));
        }

        let version = self.clock.next();
        let work = ResolveWork::new(root, self.id, version, self.state.clone())
            .accessibility(self.config.accessibility_enabled)
            .reuse_pure_subtrees(self.config.reuse_pure_subtrees)
            .previous(previous)
            .tree_props(props)
            .logger(self.logger.clone());
        let future = self.resolver.submit(self.id, work, RunMode::Sync);
        match self.resolver.get(&future) {
            FutureResult::Completed(r) if self.commit_resolve(&r) => Ok(Ok(r)),
            FutureResult::Completed(_) | FutureResult::Released => {
                Ok(Err(RenderOutcome::Discarded))
            }
            FutureResult::Interrupted => Ok(Err(RenderOutcome::Interrupted)),
            FutureResult::Failed(e) => Err(e),
        }
    }

    fn layout(
        &self,
        resolve: Arc<ResolveResult>,
        width: SizeSpec,
        height: SizeSpec,
    ) -> Result<RenderOutcome, PipelineError> {
        let previous = self.committed.read().layout.clone();
        if let Some(prev) = &previous
            && Arc::ptr_eq(prev.resolve(), &resolve)
            && prev.size_specs() == (width, height)
        {
            return Ok(RenderOutcome::Unchanged(prev.clone()));
        }

        let version = self.clock.next();
        // Size changes lay out the committed resolve again.
        let work = LayoutWork::new(resolve, version, width, height)
            .remeasure(true)
            .diff(previous.map(|l| l.diff().clone()))
            .logger(self.logger.clone());
        let future = self.layouter.submit(self.id, work, RunMode::Sync);
        match self.layouter.get(&future) {
            FutureResult::Completed(state) => Ok(if self.commit_layout(&state) {
                RenderOutcome::Committed(state)
            } else {
                RenderOutcome::Discarded
            }),
            FutureResult::Interrupted => Ok(RenderOutcome::Interrupted),
            FutureResult::Released => Ok(RenderOutcome::Discarded),
            FutureResult::Failed(e) => Err(e),
        }
    }

    fn commit_resolve(&self, r: &Arc<ResolveResult>) -> bool {
        let _publish = self.publish.lock();
        if self.released.load(Ordering::Acquire) {
            return false;
        }
        let mut committed = self.committed.write();
        if let Some(cur) = &committed.resolve {
            if Arc::ptr_eq(cur, r) {
                return true;
            }
            if cur.version() >= r.version() {
                log::debug!(
                    "tree {}: dropping resolve v{} (v{} committed)",
                    self.id,
                    r.version(),
                    cur.version()
                );
                return false;
            }
        }
        let span = PerfSpan::begin(self.logger.as_ref(), PerfEvent::Commit, self.id);
        span.annotate("resolve", r.version());
        self.state
            .commit(r.state(), r.initial_states(), r.cached_values());
        self.handlers.rebind(r.version(), r.handlers());
        committed.resolve = Some(r.clone());
        true
    }

    fn commit_layout(&self, state: &Arc<LayoutState>) -> bool {
        {
            let _publish = self.publish.lock();
            if self.released.load(Ordering::Acquire) {
                return false;
            }
            let mut committed = self.committed.write();
            if committed
                .layout
                .as_ref()
                .is_some_and(|l| Arc::ptr_eq(l, state))
            {
                return true;
            }
            let current_resolve = committed.resolve.as_ref().map(|r| r.version());
            if current_resolve != Some(state.resolve_version()) {
                log::debug!(
                    "tree {}: dropping layout v{} of stale resolve v{}",
                    self.id,
                    state.version(),
                    state.resolve_version()
                );
                return false;
            }
            if committed
                .layout
                .as_ref()
                .is_some_and(|l| l.version() >= state.version())
            {
                return false;
            }

            let span = PerfSpan::begin(self.logger.as_ref(), PerfEvent::Commit, self.id);
            span.annotate("layout", state.version());
            self.state
                .commit_initial(state.nested_initial_states(), state.nested_cached_values());
            self.handlers.rebind(state.version(), state.nested_handlers());
            self.handlers.prune(state.live_keys());
            self.state.retain_owners(state.live_keys());
            committed.layout = Some(state.clone());
        }
        self.deliver(state.clone());
        true
    }

    fn deliver(&self, state: Arc<LayoutState>) {
        match &self.poster {
            Some(poster) if thread::current().id() != self.main_thread => {
                let notifier = self.notifier.clone();
                if let Err(e) = poster.execute(Box::new(move || notifier.notify(&state))) {
                    log::warn!("tree {}: cannot post commit to the main thread: {e}", self.id);
                }
            }
            _ => self.notifier.notify(&state),
        }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("releasing tree {}", self.id);
        self.state.clear_update_listener();
        self.resolver.release_tree(self.id);
        self.layouter.release_tree(self.id);
    }
}

impl Drop for TreeInner {
    fn drop(&mut self) {
        self.release();
    }
}
