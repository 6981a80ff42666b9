//! # Layout
//!
//! Turns a [`ResolveResult`] into a [`LayoutState`] by handing the node tree
//! to the flexbox engine. The engine calls back for every measured leaf; the
//! callback answers, in order of preference, from:
//!
//! 1. measurements taken during resolve (`RenderScope::measure`),
//! 2. the previous committed layout's [`DiffTree`], when the component is
//!    equivalent and the specs are compatible,
//! 3. the node's measure function.
//!
//! Deferred nodes are measured by resolving and laying out their content as a
//! nested tree. Once the engine is done each deferred node is laid out again at
//! its final size and the nested result is inlined into the outer state.
//!
//! A measure failure goes to the node's nearest error boundary; the fallback
//! is laid out in the failed node's place and the engine runs again.
//!
//! Like resolve, a layout pass polls its [`InterruptToken`] at node
//! boundaries and returns a [`PartialLayout`] when asked to stop. Everything
//! measured before the stop is kept.
//!
//! [`InterruptToken`]: crate::InterruptToken

mod engine;
mod state;

use std::sync::Arc;

use crate::context::{InterruptToken, LayoutContext};
use crate::diff::DiffTree;
use crate::error::{PipelineError, TreeId};
use crate::future::{Step, TreeWork};
use crate::perf::PerfLogger;
use crate::resolve::ResolveResult;
use crate::size_spec::SizeSpec;

use engine::LayoutPass;

pub use state::{
    LayoutKind, LayoutState, LayoutStats, MeasureSource, NodeLayout, OutputId, ROOT_HOST_ID,
    RenderOutput,
};

pub enum LayoutOutcome {
    Complete(LayoutState),
    Interrupted(PartialLayout),
}

impl LayoutOutcome {
    pub fn is_partial_result(&self) -> bool {
        matches!(self, LayoutOutcome::Interrupted(_))
    }

    pub fn complete(self) -> Option<LayoutState> {
        match self {
            LayoutOutcome::Complete(s) => Some(s),
            LayoutOutcome::Interrupted(_) => None,
        }
    }

    pub fn partial(self) -> Option<PartialLayout> {
        match self {
            LayoutOutcome::Complete(_) => None,
            LayoutOutcome::Interrupted(p) => Some(p),
        }
    }
}

/// An interrupted layout pass over an already resolved tree.
pub struct PartialLayout {
    pass: LayoutPass,
}

impl PartialLayout {
    pub fn resume(self) -> Result<LayoutOutcome, PipelineError> {
        log::debug!(
            "resuming layout of tree {} v{}",
            self.pass.cx.tree_id,
            self.pass.cx.version
        );
        self.pass.run()
    }

    pub fn version(&self) -> u64 {
        self.pass.cx.version
    }

    pub fn token(&self) -> &Arc<InterruptToken> {
        &self.pass.cx.token
    }
}

/// Lays out `cx.resolve` under the context's size specs.
pub fn calculate(cx: LayoutContext) -> Result<LayoutOutcome, PipelineError> {
    LayoutPass::new(cx)?.run()
}

/// A layout request for the tree future coordinator.
pub struct LayoutWork {
    resolve: Arc<ResolveResult>,
    tree_id: TreeId,
    version: u64,
    width: SizeSpec,
    height: SizeSpec,
    diff: Option<Arc<DiffTree>>,
    logger: Option<Arc<dyn PerfLogger>>,
    remeasure: bool,
}

impl LayoutWork {
    pub fn new(resolve: Arc<ResolveResult>, version: u64, width: SizeSpec, height: SizeSpec) -> Self {
        Self {
            tree_id: resolve.tree_id(),
            resolve,
            version,
            width,
            height,
            diff: None,
            logger: None,
            remeasure: false,
        }
    }

    /// See [`LayoutContext::with_remeasure`].
    pub fn remeasure(mut self, remeasure: bool) -> Self {
        self.remeasure = remeasure;
        self
    }

    pub fn diff(mut self, diff: Option<Arc<DiffTree>>) -> Self {
        self.diff = diff;
        self
    }

    pub fn logger(mut self, logger: Option<Arc<dyn PerfLogger>>) -> Self {
        self.logger = logger;
        self
    }

    pub fn resolve(&self) -> &Arc<ResolveResult> {
        &self.resolve
    }
}

impl TreeWork for LayoutWork {
    type Output = LayoutState;
    type Progress = PartialLayout;

    fn version(&self) -> u64 {
        self.version
    }

    fn is_equivalent_to(&self, other: &Self) -> bool {
        let same_diff = match (&self.diff, &other.diff) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.tree_id == other.tree_id
            && Arc::ptr_eq(&self.resolve, &other.resolve)
            && self.width == other.width
            && self.height == other.height
            && same_diff
    }

    fn run(
        &self,
        progress: Option<PartialLayout>,
        token: &Arc<InterruptToken>,
    ) -> Result<Step<LayoutState, PartialLayout>, PipelineError> {
        let outcome = match progress {
            Some(partial) => partial.resume()?,
            None => calculate(
                LayoutContext::new(self.version, self.resolve.clone(), self.width, self.height)
                    .with_diff(self.diff.clone())
                    .with_token(token.clone())
                    .with_logger(self.logger.clone())
                    .with_remeasure(self.remeasure),
            )?,
        };
        Ok(match outcome {
            LayoutOutcome::Complete(s) => Step::Done(s),
            LayoutOutcome::Interrupted(p) => Step::Interrupted(p),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{
        Component, ContentAllocator, Deferred, Element, Primitive, RenderUnit, Rendered,
        props_equal,
    };
    use crate::context::ResolveContext;
    use crate::error::{ComponentError, ErrorContext};
    use crate::geometry::Size;
    use crate::key::GlobalKey;
    use crate::resolve::resolve;
    use crate::scope::RenderScope;
    use crate::state::TreeState;
    use crate::future::{Executor, RunMode, ThreadExecutor, TreeFutureCoordinator};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread::{self, ThreadId};
    use std::time::{Duration, Instant};
    use crate::style::{AlignItems, FlexDirection, Length, NodeStyle, Sides};

    #[derive(Debug)]
    struct Host;

    impl ContentAllocator for Host {
        fn content_type(&self) -> &'static str {
            "host"
        }
    }

    struct Row(Vec<Element>);

    impl Component for Row {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            let style = NodeStyle {
                flex_direction: FlexDirection::Row,
                align_items: Some(AlignItems::Baseline),
                ..Default::default()
            };
            Ok(Rendered::Primitive(
                Primitive::new(style).children(self.0.iter().cloned()),
            ))
        }
    }

    struct Block {
        size: Size,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Block {
        fn new(w: f32, h: f32, calls: &Arc<AtomicUsize>) -> Self {
            Self {
                size: Size::new(w, h),
                calls: calls.clone(),
                fail: false,
            }
        }
    }

    impl PartialEq for Block {
        fn eq(&self, other: &Self) -> bool {
            self.size == other.size && self.fail == other.fail
        }
    }

    impl Component for Block {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            let size = self.size;
            let calls = self.calls.clone();
            let fail = self.fail;
            Ok(Rendered::Primitive(
                Primitive::new(NodeStyle::default())
                    .measure(move |w: SizeSpec, h: SizeSpec| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if fail {
                            return Err(ComponentError::new("cannot measure"));
                        }
                        Ok(Size::new(w.resolve(size.width), h.resolve(size.height)))
                    })
                    .baseline(|_, h| h * 0.75)
                    .render_unit(RenderUnit::new(Arc::new(Host))),
            ))
        }

        fn is_equivalent_to(&self, other: &dyn Component) -> bool {
            props_equal(self, other)
        }
    }

    fn lay_out(root: &Element, width: SizeSpec, diff: Option<Arc<DiffTree>>) -> LayoutState {
        let state = Arc::new(TreeState::new());
        let r = resolve(root, ResolveContext::builder(1, 1, state).build())
            .unwrap()
            .complete()
            .unwrap();
        calculate(
            LayoutContext::new(1, Arc::new(r), width, SizeSpec::Unspecified).with_diff(diff),
        )
        .unwrap()
        .complete()
        .unwrap()
    }

    #[test]
    fn children_are_positioned_and_mounted_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let root = Element::new(Row(vec![
            Element::new(Block::new(30.0, 10.0, &calls)).with_key("a"),
            Element::new(Block::new(20.0, 16.0, &calls)).with_key("b"),
        ]));
        let s = lay_out(&root, SizeSpec::Exactly(100.0), None);

        assert_eq!(s.width(), 100.0);
        assert_eq!(s.outputs()[0].id, ROOT_HOST_ID);
        let keys: Vec<_> = s.outputs().iter().skip(1).map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["Row$a", "Row$b"]);
        let b = s.layout(&GlobalKey::from("Row$b")).unwrap();
        assert_eq!((b.width, b.height), (20.0, 16.0));
        assert_eq!(b.measure_source, Some(MeasureSource::Measured));
        assert_eq!(s.child_position(&GlobalKey::from("Row"), 1).unwrap().0, 30.0);
        assert!(b.baseline.is_some());
    }

    #[test]
    fn diff_tree_serves_compatible_measurements() {
        let calls = Arc::new(AtomicUsize::new(0));
        let make = || {
            Element::new(Row(vec![
                Element::new(Block::new(30.0, 10.0, &calls)).with_key("a"),
            ]))
        };
        let first = lay_out(&make(), SizeSpec::Exactly(100.0), None);
        let measured = calls.load(Ordering::SeqCst);
        assert!(measured > 0);

        let second = lay_out(&make(), SizeSpec::Exactly(100.0), Some(first.diff().clone()));
        assert_eq!(calls.load(Ordering::SeqCst), measured);
        let a = GlobalKey::from("Row$a");
        assert!(second.stats().cache_hit_count(&a) > 0);
        assert_eq!(second.stats().measure_count(&a), 0);
        assert_eq!(
            second.layout(&a).unwrap().measure_source,
            Some(MeasureSource::DiffTree)
        );
    }

    struct Responsive;

    impl Component for Responsive {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            let style = NodeStyle {
                padding: Sides::all(Length::Points(5.0)),
                ..Default::default()
            };
            Ok(Rendered::Deferred(Deferred::new(style, |w, _h| {
                let calls = Arc::new(AtomicUsize::new(0));
                let wide = w.size().is_some_and(|w| w >= 50.0);
                Element::new(Block::new(if wide { 40.0 } else { 10.0 }, 10.0, &calls))
            })))
        }
    }

    #[test]
    fn deferred_content_is_laid_out_as_one_child() {
        let s = lay_out(&Element::new(Responsive), SizeSpec::Exactly(80.0), None);
        let root = s.layout(&GlobalKey::from("Responsive")).unwrap();
        assert_eq!(root.kind, LayoutKind::Deferred);
        assert_eq!(root.child_position(0).unwrap(), (5.0, 5.0));
        assert!(matches!(
            root.child_position(1),
            Err(PipelineError::InvalidChildIndex { index: 1, .. })
        ));

        let child = s.layout(&GlobalKey::from("Responsive,Block")).unwrap();
        assert_eq!(child.absolute.x, 5.0);
        // The nested root is laid out at exactly the deferred node's content width.
        assert_eq!(child.width, 70.0);
        assert_eq!(root.width, 80.0);
        assert_eq!(s.outputs().len(), 2);
        assert!(s.stats().nested_resolves >= 1);
    }

    struct Boundary(Element);

    impl Component for Boundary {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            Ok(Rendered::Delegate(self.0.clone()))
        }

        fn is_error_boundary(&self) -> bool {
            true
        }

        fn on_error(&self, _cx: &ErrorContext, _error: &ComponentError) -> Option<Element> {
            let calls = Arc::new(AtomicUsize::new(0));
            Some(Element::new(Block::new(12.0, 12.0, &calls)).with_key("fallback"))
        }
    }

    #[test]
    fn measure_failures_lay_out_the_boundary_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = Element::new(Block {
            fail: true,
            ..Block::new(30.0, 10.0, &calls)
        });
        let root = Element::new(Row(vec![Element::new(Boundary(failing)).with_key("b")]));
        let s = lay_out(&root, SizeSpec::Exactly(100.0), None);

        let b = s.layout(&GlobalKey::from("Row$b")).unwrap();
        assert_eq!(b.kind, LayoutKind::Deferred);
        assert_eq!((b.width, b.height), (12.0, 12.0));
        assert!(s.stats().engine_passes >= 2);
    }

    #[test]
    fn unhandled_measure_failures_abort() {
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = Element::new(Block {
            fail: true,
            ..Block::new(30.0, 10.0, &calls)
        });
        let state = Arc::new(TreeState::new());
        let r = resolve(&Element::new(Row(vec![failing])), ResolveContext::builder(1, 1, state).build())
            .unwrap()
            .complete()
            .unwrap();
        let err = calculate(LayoutContext::new(
            1,
            Arc::new(r),
            SizeSpec::Exactly(100.0),
            SizeSpec::Unspecified,
        ))
        .err()
        .unwrap();
        assert!(matches!(err, PipelineError::Measure { .. }));
    }

    #[test]
    fn a_consumed_resolve_lays_out_again_only_when_remeasuring() {
        let calls = Arc::new(AtomicUsize::new(0));
        let block = Element::new(Block::new(30.0, 10.0, &calls));
        let state = Arc::new(TreeState::new());
        let r = resolve(&Element::new(Row(vec![block])), ResolveContext::builder(1, 1, state).build())
            .unwrap()
            .complete()
            .map(Arc::new)
            .unwrap();
        let width = SizeSpec::Exactly(100.0);
        calculate(LayoutContext::new(1, r.clone(), width, SizeSpec::Unspecified)).unwrap();
        let first = calls.load(Ordering::SeqCst);

        let err = calculate(LayoutContext::new(2, r.clone(), width, SizeSpec::Unspecified))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::CacheConsumed));
        assert_eq!(calls.load(Ordering::SeqCst), first);

        let narrow = LayoutContext::new(3, r, SizeSpec::Exactly(20.0), SizeSpec::Unspecified)
            .with_remeasure(true);
        let s = calculate(narrow).unwrap().complete().unwrap();
        assert!(calls.load(Ordering::SeqCst) > first);
        assert!(s.layout(&GlobalKey::from("Row,Block")).unwrap().width <= 20.0);
    }

    #[test]
    fn layout_work_equivalence_needs_the_same_resolve() {
        let state = Arc::new(TreeState::new());
        let resolved = |v| {
            Arc::new(
                resolve(
                    &Element::new(Responsive),
                    ResolveContext::builder(1, v, state.clone()).build(),
                )
                .unwrap()
                .complete()
                .unwrap(),
            )
        };
        let r = resolved(1);
        let a = LayoutWork::new(r.clone(), 1, SizeSpec::Exactly(10.0), SizeSpec::Unspecified);
        let b = LayoutWork::new(r, 2, SizeSpec::Exactly(10.0), SizeSpec::Unspecified);
        let c = LayoutWork::new(resolved(2), 3, SizeSpec::Exactly(10.0), SizeSpec::Unspecified);
        assert!(a.is_equivalent_to(&b));
        assert!(!a.is_equivalent_to(&c));
    }

    type Hook = Arc<dyn Fn() + Send + Sync>;

    /// Leaf that records the threads measuring it and runs `on_first` inside
    /// its first measurement.
    struct Watched {
        threads: Arc<Mutex<Vec<ThreadId>>>,
        on_first: Option<Hook>,
    }

    impl Component for Watched {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            let threads = self.threads.clone();
            let on_first = self.on_first.clone();
            Ok(Rendered::Primitive(Primitive::new(NodeStyle::default()).measure(
                move |w: SizeSpec, h: SizeSpec| {
                    let first = {
                        let mut t = threads.lock();
                        t.push(thread::current().id());
                        t.len() == 1
                    };
                    if first && let Some(f) = &on_first {
                        f();
                    }
                    Ok(Size::new(w.resolve(25.0), h.resolve(14.0)))
                },
            )))
        }
    }

    fn watched(key: &str, threads: &Arc<Mutex<Vec<ThreadId>>>, on_first: Option<Hook>) -> Element {
        Element::new(Watched {
            threads: threads.clone(),
            on_first,
        })
        .with_key(key)
    }

    fn resolved(root: &Element) -> Arc<ResolveResult> {
        let state = Arc::new(TreeState::new());
        Arc::new(
            resolve(root, ResolveContext::builder(1, 1, state).build())
                .unwrap()
                .complete()
                .unwrap(),
        )
    }

    fn other_thread() -> ThreadId {
        thread::spawn(|| thread::current().id()).join().unwrap()
    }

    #[test]
    fn interrupted_layout_resumes_without_measuring_twice() {
        let row = |token: &Arc<InterruptToken>,
                   a: &Arc<Mutex<Vec<ThreadId>>>,
                   b: &Arc<Mutex<Vec<ThreadId>>>| {
            let token = token.clone();
            Element::new(Row(vec![
                watched("a", a, Some(Arc::new(move || token.request_interrupt()))),
                watched("b", b, None),
            ]))
        };

        // Interrupts are ignored on the main thread.
        let main = Arc::new(InterruptToken::for_current_thread());
        let (ref_a, ref_b) = (Arc::default(), Arc::default());
        let width = SizeSpec::Exactly(100.0);
        let reference = calculate(
            LayoutContext::new(1, resolved(&row(&main, &ref_a, &ref_b)), width, SizeSpec::Unspecified)
                .with_token(main),
        )
        .unwrap()
        .complete()
        .unwrap();

        let worker = Arc::new(InterruptToken::new(other_thread()));
        let (a, b) = (Arc::default(), Arc::default());
        let outcome = calculate(
            LayoutContext::new(2, resolved(&row(&worker, &a, &b)), width, SizeSpec::Unspecified)
                .with_token(worker.clone()),
        )
        .unwrap();
        assert!(outcome.is_partial_result());
        let partial = outcome.partial().unwrap();
        assert_eq!(partial.version(), 2);
        assert_eq!(a.lock().len(), 1);

        partial.token().clear_interrupt();
        let state = partial.resume().unwrap().complete().unwrap();
        assert_eq!(a.lock().len(), ref_a.lock().len());
        assert_eq!(b.lock().len(), ref_b.lock().len());
        for key in ["Row$a", "Row$b"] {
            let key = GlobalKey::from(key);
            let (got, want) = (state.layout(&key).unwrap(), reference.layout(&key).unwrap());
            assert_eq!(
                (got.x, got.y, got.width, got.height),
                (want.x, want.y, want.width, want.height)
            );
        }
    }

    #[test]
    fn main_thread_takes_over_a_background_layout() {
        let main = thread::current().id();
        let (started_tx, started) = mpsc::channel();
        let (gate_tx, gate) = mpsc::channel::<()>();
        let gate = Mutex::new(gate);
        let hold: Hook = Arc::new(move || {
            let _ = started_tx.send(());
            let _ = gate.lock().recv_timeout(Duration::from_secs(5));
        });
        let (a, b) = (Arc::default(), Arc::default());
        let root = Element::new(Row(vec![watched("a", &a, Some(hold)), watched("b", &b, None)]));

        let coordinator = TreeFutureCoordinator::new(main);
        let executor: Arc<dyn Executor> = Arc::new(ThreadExecutor::new("layout-worker"));
        let work = LayoutWork::new(resolved(&root), 2, SizeSpec::Exactly(100.0), SizeSpec::Unspecified);
        let future = coordinator.submit(1, work, RunMode::Async(executor));
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        // Lets the worker go once the main thread has asked it to stop.
        let opener = {
            let future = future.clone();
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !future.token().is_interrupt_requested() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(1));
                }
                let _ = gate_tx.send(());
            })
        };
        let state = coordinator.get(&future).completed().unwrap();
        opener.join().unwrap();

        assert_eq!(state.version(), 2);
        let a = a.lock();
        assert_ne!(a[0], main);
        assert!(a[1..].iter().all(|t| *t == main));
        let b = b.lock();
        assert!(!b.is_empty());
        assert!(b.iter().all(|t| *t == main));
    }
}
