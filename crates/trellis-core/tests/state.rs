use std::sync::Arc;

use parking_lot::Mutex;
use trellis_core::prelude::*;
use trellis_core::{ResolveContext, TreeState, resolve};

/// Renders its counter as the leaf width and records every value it saw.
struct Counter {
    seen: Arc<Mutex<Vec<u32>>>,
    bump_during_render: bool,
    clicks: Arc<Mutex<Option<EventHandler>>>,
}

impl Component for Counter {
    fn render(&self, cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
        let count = cx.use_state(|| 0u32);
        let value = count.get();
        self.seen.lock().push(value);
        if self.bump_during_render {
            count.updater().set(value + 1, UpdateMode::Lazy);
        }

        let updater = count.updater();
        let handler = cx.event_handler("click", move |delta: &u32| {
            let delta = *delta;
            updater.update(move |v| v + delta, UpdateMode::Sync);
        });
        *self.clicks.lock() = Some(handler);

        let width = value as f32;
        Ok(Rendered::Primitive(Primitive::new(NodeStyle::default()).measure(
            move |w: SizeSpec, h: SizeSpec| Ok(Size::new(w.resolve(width), h.resolve(1.0))),
        )))
    }

    fn is_pure(&self) -> bool {
        false
    }
}

fn counter(bump: bool) -> (Element, Arc<Mutex<Vec<u32>>>, Arc<Mutex<Option<EventHandler>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let clicks = Arc::new(Mutex::new(None));
    let element = Element::new(Counter {
        seen: seen.clone(),
        bump_during_render: bump,
        clicks: clicks.clone(),
    });
    (element, seen, clicks)
}

#[test]
fn updates_made_during_a_pass_are_seen_by_the_next_one() {
    let state = Arc::new(TreeState::new());
    let (root, seen, _) = counter(true);

    let first = resolve(&root, ResolveContext::builder(1, 1, state.clone()).build())
        .unwrap()
        .complete()
        .unwrap();
    assert_eq!(*seen.lock(), vec![0]);
    assert!(state.has_pending());
    state.commit(first.state(), first.initial_states(), first.cached_values());
    assert!(state.has_pending(), "updates from the pass itself stay queued");

    let second = resolve(&root, ResolveContext::builder(1, 2, state.clone()).build())
        .unwrap()
        .complete()
        .unwrap();
    assert_eq!(*seen.lock(), vec![0, 1]);
    state.commit(second.state(), second.initial_states(), second.cached_values());
}

#[test]
fn dispatch_reaches_the_latest_callback_and_rerenders() {
    let tree = RenderTree::new(TreeConfig::default());
    tree.set_size_specs(SizeSpec::AtMost(500.0), SizeSpec::AtMost(500.0));
    let (root, seen, clicks) = counter(false);
    tree.set_root(root);

    let first = tree.render_sync().unwrap();
    assert_eq!(first.layout().unwrap().width(), 0.0);
    let stale = clicks.lock().clone().unwrap();

    // Sync updates render on the dispatching thread.
    assert!(tree.dispatch(&stale, &5u32));
    let after_one = tree.committed_layout().unwrap();
    assert_eq!(after_one.width(), 5.0);
    assert_eq!(*seen.lock(), vec![0, 5]);

    // The handle from the first generation still dispatches to the callback
    // bound by the latest commit.
    let fresh = clicks.lock().clone().unwrap();
    assert_eq!(stale, fresh);
    assert!(fresh.generation() > stale.generation());
    assert!(tree.dispatch(&stale, &2u32));
    assert_eq!(tree.committed_layout().unwrap().width(), 7.0);

    let key = after_one.resolve().root_node().unwrap().key().clone();
    let slot = trellis_core::StateKey::new(key, 0);
    assert_eq!(tree.state().committed_value::<u32>(&slot), Some(7));
}

#[test]
fn lazy_updates_wait_for_the_next_render() {
    let tree = RenderTree::new(TreeConfig::default());
    tree.set_size_specs(SizeSpec::AtMost(500.0), SizeSpec::AtMost(500.0));
    let (root, seen, _) = counter(false);
    tree.set_root(root);
    let first = tree.render_sync().unwrap();
    let key = first.layout().unwrap().resolve().root_node().unwrap().key().clone();

    let updater = tree.state_updater::<u32>(trellis_core::StateKey::new(key, 0));
    updater.set(3, UpdateMode::Lazy);
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(tree.state().pending_len(), 1);

    let next = tree.render_sync().unwrap();
    assert!(next.is_committed());
    assert_eq!(next.layout().unwrap().width(), 3.0);
    assert!(!tree.state().has_pending());
}

#[test]
fn state_of_removed_components_is_dropped() {
    struct Swap(bool, Element);

    impl Component for Swap {
        fn render(&self, _cx: &mut RenderScope<'_>) -> Result<Rendered, ComponentError> {
            let mut p = Primitive::new(NodeStyle::default());
            if self.0 {
                p = p.child(self.1.clone());
            }
            Ok(Rendered::Primitive(p))
        }
    }

    let tree = RenderTree::new(TreeConfig::default());
    tree.set_size_specs(SizeSpec::AtMost(500.0), SizeSpec::AtMost(500.0));
    let (inner, _, _) = counter(false);
    tree.set_root(Element::new(Swap(true, inner.clone())));
    tree.render_sync().unwrap();
    let slot = trellis_core::StateKey::new(GlobalKey::from("Swap,Counter"), 0);
    assert_eq!(tree.state().committed_value::<u32>(&slot), Some(0));

    tree.set_root(Element::new(Swap(false, inner)));
    tree.render_sync().unwrap();
    assert_eq!(tree.state().committed_value::<u32>(&slot), None);
}
