use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::cache::MeasuredResultCache;
use crate::component::{ComponentId, Element, Rendered};
use crate::error::{ComponentError, catch_component};
use crate::events::{EventCallback, EventHandler, EventHandlerRecord};
use crate::geometry::Size;
use crate::key::{GlobalKey, KeyRegistry};
use crate::size_spec::SizeSpec;
use crate::state::{CachedEntry, StateHandle, StateKey, StateSnapshot, StateValue, TreeState};
use crate::tree_props::{TreePropContainer, TreePropValue};

/// Read-only inputs shared by every render of one pass.
#[derive(Clone, Copy)]
pub(crate) struct ScopeEnv<'a> {
    pub generation: u64,
    pub accessibility: bool,
    pub state: &'a Arc<TreeState>,
    pub snapshot: &'a StateSnapshot,
    /// Hook values created earlier in the pass by `RenderScope::measure`.
    pub seeded: &'a HashMap<StateKey, StateValue>,
}

/// What a render produced besides its `Rendered` value.
#[derive(Default)]
pub(crate) struct RenderOutputs {
    pub inits: Vec<(StateKey, StateValue)>,
    pub cached: Vec<(StateKey, CachedEntry)>,
    pub handlers: SmallVec<[EventHandlerRecord; 1]>,
    /// Set when the component provided tree props to its children.
    pub child_props: Option<TreePropContainer>,
}

/// Handed to [`Component::render`](crate::Component::render). Hooks are
/// identified by call order, so a component must call them in the same order
/// on every render.
pub struct RenderScope<'a> {
    env: ScopeEnv<'a>,
    key: &'a GlobalKey,
    props: &'a TreePropContainer,
    cache: &'a mut MeasuredResultCache,
    next_slot: u32,
    outputs: RenderOutputs,
    measured_keys: KeyRegistry,
    measured: HashMap<ComponentId, GlobalKey>,
}

impl<'a> RenderScope<'a> {
    pub(crate) fn new(
        env: ScopeEnv<'a>,
        key: &'a GlobalKey,
        props: &'a TreePropContainer,
        cache: &'a mut MeasuredResultCache,
    ) -> Self {
        Self {
            env,
            key,
            props,
            cache,
            next_slot: 0,
            outputs: RenderOutputs::default(),
            measured_keys: KeyRegistry::default(),
            measured: HashMap::new(),
        }
    }

    pub(crate) fn finish(self) -> RenderOutputs {
        self.outputs
    }

    pub fn global_key(&self) -> &GlobalKey {
        self.key
    }

    pub fn generation(&self) -> u64 {
        self.env.generation
    }

    pub fn is_accessibility_enabled(&self) -> bool {
        self.env.accessibility
    }

    fn next_key(&mut self) -> StateKey {
        let slot = self.next_slot;
        self.next_slot += 1;
        StateKey {
            owner: self.key.clone(),
            slot,
        }
    }

    /// State that survives re-renders. `init` runs only the first time the
    /// slot is seen.
    pub fn use_state<T: Any + Send + Sync>(&mut self, init: impl FnOnce() -> T) -> StateHandle<T> {
        let key = self.next_key();
        let stored = self
            .env
            .snapshot
            .get(&key)
            .or_else(|| self.env.seeded.get(&key));
        let existing = match stored {
            Some(v) => match v.clone().downcast::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    log::warn!(
                        "use_state: type mismatch for {key:?}; expected {}, reinitialising",
                        std::any::type_name::<T>()
                    );
                    None
                }
            },
            None => None,
        };
        let value = existing.unwrap_or_else(|| {
            let v = Arc::new(init());
            self.outputs.inits.push((key.clone(), v.clone() as StateValue));
            v
        });
        StateHandle::new(key, value, self.env.state.clone())
    }

    /// Returns the value computed for `deps`, recomputing only when `deps`
    /// differs from the committed ones.
    pub fn use_cached<D, T>(&mut self, deps: D, compute: impl FnOnce(&D) -> T) -> T
    where
        D: PartialEq + Any + Send + Sync,
        T: Clone + Any + Send + Sync,
    {
        let key = self.next_key();
        if let Some(entry) = self.env.snapshot.cached(&key)
            && entry.deps.downcast_ref::<D>() == Some(&deps)
            && let Some(v) = entry.value.downcast_ref::<T>()
        {
            return v.clone();
        }
        let value = compute(&deps);
        self.outputs.cached.push((
            key,
            CachedEntry {
                deps: Arc::new(deps),
                value: Arc::new(value.clone()),
            },
        ));
        value
    }

    pub fn tree_prop<T: TreePropValue>(&self) -> Option<&T> {
        self.props.get::<T>()
    }

    /// Sets a tree prop for this component's children. Siblings and
    /// ancestors keep their own values.
    pub fn provide<T: TreePropValue>(&mut self, value: T) {
        let base = self.outputs.child_props.as_ref().unwrap_or(self.props);
        self.outputs.child_props = Some(base.with(value));
    }

    /// Registers `callback` under `name` for this component. The returned
    /// handler stays valid across generations and always dispatches to the
    /// callback of the latest committed render.
    pub fn event_handler<E: Any>(
        &mut self,
        name: &str,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> EventHandler {
        let handler = EventHandler::new(self.key.clone(), name, self.env.generation);
        let label = handler.clone();
        let callback: EventCallback = Arc::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
            Some(e) => callback(e),
            None => log::warn!(
                "{label:?} expects {}, dropping event",
                std::any::type_name::<E>()
            ),
        });
        self.outputs.handlers.push(EventHandlerRecord {
            handler: handler.clone(),
            callback,
        });
        handler
    }

    /// Measures `element` as a child of this component would be measured
    /// during layout. The result is cached and reused by the layout pass.
    ///
    /// Unkeyed children are keyed in the order they are first measured, which
    /// has to match their order among the rendered children. Hook values and
    /// handlers the child creates here carry over to its own render.
    pub fn measure(
        &mut self,
        element: &Element,
        width: SizeSpec,
        height: SizeSpec,
    ) -> Result<Size, ComponentError> {
        if let Some(size) = self.cache.get(element.id(), width, height) {
            return Ok(size);
        }

        let mut key = match self.measured.get(&element.id()) {
            Some(k) => k.clone(),
            None => {
                let k = self.measured_keys.key_for(Some(self.key), element);
                self.measured.insert(element.id(), k.clone());
                k
            }
        };
        // Delegates have one child each, so a per-call registry keys them as
        // the walk does.
        let mut chain_keys = KeyRegistry::default();
        let mut current = element.clone();
        let mut props = self
            .outputs
            .child_props
            .clone()
            .unwrap_or_else(|| self.props.clone());

        loop {
            let mut scope = RenderScope::new(self.env, &key, &props, &mut *self.cache);
            let rendered = catch_component(|| current.component().render(&mut scope));
            let out = scope.finish();
            if let Some(p) = out.child_props {
                props = p;
            }
            self.outputs.inits.extend(out.inits);
            self.outputs.cached.extend(out.cached);
            self.outputs.handlers.extend(out.handlers);

            match rendered? {
                Rendered::Delegate(next) => {
                    key = chain_keys.key_for(Some(&key), &next);
                    current = next;
                }
                Rendered::Primitive(p) => {
                    let Some(m) = p.measure else {
                        return Err(ComponentError::new(format!(
                            "`{}` has no measure function",
                            current.type_name()
                        )));
                    };
                    let size = catch_component(|| m.measure(width, height))?;
                    self.cache.insert(element.id(), width, height, size);
                    return Ok(size);
                }
                Rendered::Deferred(_) => {
                    return Err(ComponentError::new(format!(
                        "`{}` is deferred and can only be measured during layout",
                        current.type_name()
                    )));
                }
                Rendered::Empty => return Ok(Size::ZERO),
            }
        }
    }
}
