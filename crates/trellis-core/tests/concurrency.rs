use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use trellis_core::context::InterruptToken;
use trellis_core::prelude::*;
use trellis_core::{ResolveContext, TreeState, resolve};

struct Root(Vec<Element>);

impl Component for Root {
    fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        Ok(Rendered::Primitive(
            Primitive::new(NodeStyle::default()).children(self.0.iter().cloned()),
        ))
    }
}

/// Counts renders and can ask a token to interrupt from inside its render.
struct Tracked {
    renders: Arc<AtomicUsize>,
    interrupt: Option<Arc<InterruptToken>>,
    delay: Duration,
}

impl Tracked {
    fn element(key: &str, renders: &Arc<AtomicUsize>) -> Element {
        Element::new(Tracked {
            renders: renders.clone(),
            interrupt: None,
            delay: Duration::ZERO,
        })
        .with_key(key)
    }
}

impl Component for Tracked {
    fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.interrupt {
            token.request_interrupt();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(Rendered::Primitive(Primitive::new(NodeStyle::default()).measure(
            |w: SizeSpec, h: SizeSpec| Ok(Size::new(w.resolve(10.0), h.resolve(10.0))),
        )))
    }
}

fn other_thread_id() -> thread::ThreadId {
    thread::spawn(|| thread::current().id())
        .join()
        .expect("helper thread")
}

#[test]
fn interrupted_resolve_resumes_where_it_stopped() {
    let token = Arc::new(InterruptToken::new(other_thread_id()));
    let a_renders = Arc::new(AtomicUsize::new(0));
    let b_renders = Arc::new(AtomicUsize::new(0));
    let a = Element::new(Tracked {
        renders: a_renders.clone(),
        interrupt: Some(token.clone()),
        delay: Duration::ZERO,
    })
    .with_key("a");
    let root = Element::new(Root(vec![a, Tracked::element("b", &b_renders)]));

    let state = Arc::new(TreeState::new());
    let cx = ResolveContext::builder(1, 1, state)
        .token(token.clone())
        .build();
    let outcome = resolve(&root, cx).unwrap();
    assert!(outcome.is_partial_result());
    let partial = outcome.partial().unwrap();
    assert_eq!(
        partial.expanded_keys(),
        &[GlobalKey::from("Root"), GlobalKey::from("Root$a")]
    );
    assert_eq!(partial.pending(), 1);
    assert_eq!(b_renders.load(Ordering::SeqCst), 0);

    partial.token().clear_interrupt();
    let result = partial.resume().unwrap().complete().unwrap();
    assert_eq!(a_renders.load(Ordering::SeqCst), 1);
    assert_eq!(b_renders.load(Ordering::SeqCst), 1);
    assert_eq!(result.stats().rendered, 3);

    let root = result.root_node().unwrap();
    let children: Vec<_> = root
        .children()
        .iter()
        .filter_map(|id| result.tree().get(*id))
        .map(|n| n.key().as_str().to_owned())
        .collect();
    assert_eq!(children, ["Root$a", "Root$b"]);
}

#[test]
fn concurrent_equivalent_renders_share_one_resolve() {
    let renders = Arc::new(AtomicUsize::new(0));
    let tree = RenderTree::new(TreeConfig::default());
    tree.set_size_specs(SizeSpec::Exactly(50.0), SizeSpec::Exactly(50.0));
    tree.set_root(Element::new(Tracked {
        renders: renders.clone(),
        interrupt: None,
        delay: Duration::from_millis(20),
    }));

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tree = tree.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                tree.render_sync().unwrap()
            })
        })
        .collect();

    let versions: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().unwrap().layout().unwrap().resolve_version())
        .collect();
    assert_eq!(renders.load(Ordering::SeqCst), 1);
    assert!(versions.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(tree.in_flight(), (0, 0));
}

#[test]
fn committed_versions_only_increase() {
    let tree = RenderTree::new(TreeConfig::default());
    tree.set_size_specs(SizeSpec::Exactly(50.0), SizeSpec::Exactly(50.0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        tree.add_commit_listener(move |layout| seen.lock().push(layout.version()));
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tree = tree.clone();
            thread::spawn(move || {
                let renders = Arc::new(AtomicUsize::new(0));
                for _ in 0..5 {
                    tree.set_root(Tracked::element("p", &renders));
                    tree.render_sync().unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let seen = seen.lock();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        tree.committed_layout().map(|l| l.version()),
        seen.last().copied()
    );
}

/// Blocks its render until the test opens the gate.
struct Gated {
    started: mpsc::Sender<()>,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl Component for Gated {
    fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        let _ = self.started.send(());
        let _ = self.gate.lock().recv_timeout(Duration::from_secs(5));
        Ok(Rendered::Primitive(Primitive::new(NodeStyle::default())))
    }
}

#[test]
fn release_discards_work_in_flight() {
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let tree = RenderTree::new(TreeConfig::default().background(true));
    tree.set_size_specs(SizeSpec::Exactly(10.0), SizeSpec::Exactly(10.0));
    tree.set_root(Element::new(Gated {
        started: started_tx,
        gate: Mutex::new(gate_rx),
    }));
    tree.render_async(move |outcome| {
        let _ = done_tx.send(outcome);
    })
    .unwrap();

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    tree.release();
    gate_tx.send(()).unwrap();

    let outcome = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(outcome, Ok(RenderOutcome::Discarded)));
    assert!(tree.committed_layout().is_none());
    assert!(tree.committed_resolve().is_none());
    assert!(tree.is_released());
    assert!(matches!(
        tree.request_render(),
        Err(PipelineError::TreeReleased(_))
    ));
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn pipeline_results_are_shareable_across_threads() {
    assert_send_sync::<NodeStyle>();
    assert_send_sync::<trellis_core::ResolveResult>();
    assert_send_sync::<LayoutState>();
    assert_send_sync::<RenderTree>();

    let state = Arc::new(TreeState::new());
    let renders = Arc::new(AtomicUsize::new(0));
    let root = Element::new(Root(vec![Tracked::element("a", &renders)]));
    let resolved = thread::spawn(move || {
        resolve(&root, ResolveContext::builder(1, 1, state).build())
            .unwrap()
            .complete()
            .unwrap()
    })
    .join()
    .unwrap();
    assert_eq!(resolved.stats().rendered, 2);
}
