//! Per-computation contexts. A [`ResolveContext`] or [`LayoutContext`] is
//! created for one pass and owned by it; the only state shared with other
//! threads is the [`InterruptToken`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use crate::diff::DiffTree;
use crate::error::TreeId;
use crate::perf::PerfLogger;
use crate::resolve::ResolveResult;
use crate::size_spec::SizeSpec;
use crate::state::{StateSnapshot, TreeState};
use crate::tree_props::TreePropContainer;

/// Cooperative cancellation flags polled at node boundaries.
#[derive(Debug)]
pub struct InterruptToken {
    interrupt: AtomicBool,
    released: AtomicBool,
    main_thread: ThreadId,
}

impl InterruptToken {
    pub fn new(main_thread: ThreadId) -> Self {
        Self {
            interrupt: AtomicBool::new(false),
            released: AtomicBool::new(false),
            main_thread,
        }
    }

    /// A token whose main thread is the calling thread.
    pub fn for_current_thread() -> Self {
        Self::new(thread::current().id())
    }

    pub fn request_interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Release);
    }

    pub fn is_interrupt_requested(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// Released work always stops. Interrupted work stops only off the main
    /// thread; the main thread finishes what it started.
    pub fn should_yield(&self) -> bool {
        self.is_released() || (self.is_interrupt_requested() && !self.is_main_thread())
    }
}

pub struct ResolveContext {
    pub(crate) tree_id: TreeId,
    pub(crate) version: u64,
    pub(crate) state: Arc<TreeState>,
    pub(crate) snapshot: StateSnapshot,
    pub(crate) accessibility: bool,
    pub(crate) reuse_pure_subtrees: bool,
    pub(crate) previous: Option<Arc<ResolveResult>>,
    pub(crate) tree_props: TreePropContainer,
    pub(crate) token: Arc<InterruptToken>,
    pub(crate) logger: Option<Arc<dyn PerfLogger>>,
}

impl ResolveContext {
    pub fn builder(tree_id: TreeId, version: u64, state: Arc<TreeState>) -> ResolveContextBuilder {
        ResolveContextBuilder {
            tree_id,
            version,
            state,
            snapshot: None,
            accessibility: false,
            reuse_pure_subtrees: true,
            previous: None,
            tree_props: TreePropContainer::new(),
            token: None,
            logger: None,
        }
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn token(&self) -> &Arc<InterruptToken> {
        &self.token
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        &self.snapshot
    }
}

pub struct ResolveContextBuilder {
    tree_id: TreeId,
    version: u64,
    state: Arc<TreeState>,
    snapshot: Option<StateSnapshot>,
    accessibility: bool,
    reuse_pure_subtrees: bool,
    previous: Option<Arc<ResolveResult>>,
    tree_props: TreePropContainer,
    token: Option<Arc<InterruptToken>>,
    logger: Option<Arc<dyn PerfLogger>>,
}

impl ResolveContextBuilder {
    /// State to resolve against. Defaults to a fresh snapshot of the tree state.
    pub fn snapshot(mut self, snapshot: StateSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn accessibility(mut self, enabled: bool) -> Self {
        self.accessibility = enabled;
        self
    }

    pub fn reuse_pure_subtrees(mut self, reuse: bool) -> Self {
        self.reuse_pure_subtrees = reuse;
        self
    }

    /// The last committed resolve, used for subtree reuse.
    pub fn previous(mut self, previous: Option<Arc<ResolveResult>>) -> Self {
        self.previous = previous;
        self
    }

    pub fn tree_props(mut self, props: TreePropContainer) -> Self {
        self.tree_props = props;
        self
    }

    pub fn token(mut self, token: Arc<InterruptToken>) -> Self {
        self.token = Some(token);
        self
    }

    pub fn logger(mut self, logger: Option<Arc<dyn PerfLogger>>) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> ResolveContext {
        ResolveContext {
            tree_id: self.tree_id,
            version: self.version,
            snapshot: self.snapshot.unwrap_or_else(|| self.state.snapshot()),
            state: self.state,
            accessibility: self.accessibility,
            reuse_pure_subtrees: self.reuse_pure_subtrees,
            previous: self.previous,
            tree_props: self.tree_props,
            token: self
                .token
                .unwrap_or_else(|| Arc::new(InterruptToken::for_current_thread())),
            logger: self.logger,
        }
    }
}

pub struct LayoutContext {
    pub(crate) tree_id: TreeId,
    pub(crate) version: u64,
    pub(crate) resolve: Arc<ResolveResult>,
    pub(crate) diff: Option<Arc<DiffTree>>,
    pub(crate) width: SizeSpec,
    pub(crate) height: SizeSpec,
    pub(crate) token: Arc<InterruptToken>,
    pub(crate) logger: Option<Arc<dyn PerfLogger>>,
    pub(crate) remeasure: bool,
}

impl LayoutContext {
    pub fn new(version: u64, resolve: Arc<ResolveResult>, width: SizeSpec, height: SizeSpec) -> Self {
        Self {
            tree_id: resolve.tree_id(),
            version,
            resolve,
            diff: None,
            width,
            height,
            token: Arc::new(InterruptToken::for_current_thread()),
            logger: None,
            remeasure: false,
        }
    }

    /// Diff tree of the last committed layout.
    pub fn with_diff(mut self, diff: Option<Arc<DiffTree>>) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_token(mut self, token: Arc<InterruptToken>) -> Self {
        self.token = token;
        self
    }

    pub fn with_logger(mut self, logger: Option<Arc<dyn PerfLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// Allows laying out a resolve whose measured-result cache an earlier
    /// pass already took. Its sizes are then measured again. Without this a
    /// second pass fails with [`PipelineError::CacheConsumed`].
    ///
    /// [`PipelineError::CacheConsumed`]: crate::error::PipelineError::CacheConsumed
    pub fn with_remeasure(mut self, remeasure: bool) -> Self {
        self.remeasure = remeasure;
        self
    }

    pub fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn token(&self) -> &Arc<InterruptToken> {
        &self.token
    }

    pub fn resolve(&self) -> &Arc<ResolveResult> {
        &self.resolve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_thread_never_yields_to_interrupts() {
        let token = Arc::new(InterruptToken::for_current_thread());
        token.request_interrupt();
        assert!(!token.should_yield());

        let t = token.clone();
        let off_main = thread::spawn(move || t.should_yield()).join().unwrap();
        assert!(off_main);

        token.clear_interrupt();
        let t = token.clone();
        assert!(!thread::spawn(move || t.should_yield()).join().unwrap());
    }

    #[test]
    fn released_work_yields_everywhere() {
        let token = InterruptToken::for_current_thread();
        token.release();
        assert!(token.should_yield());
    }
}
