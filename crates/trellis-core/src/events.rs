//! Event handlers are identified by the owning component's key and a name, so
//! the handler object captured by a render unit stays valid across
//! generations. Dispatch always runs the callback registered by the latest
//! committed generation.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::key::GlobalKey;

pub type EventCallback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Identity of a handler is `(key, name)`; `generation` only records which
/// render created this particular handle.
#[derive(Clone)]
pub struct EventHandler {
    key: GlobalKey,
    name: Arc<str>,
    generation: u64,
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.name == other.name
    }
}

impl Eq for EventHandler {}

impl Hash for EventHandler {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.name.hash(state);
    }
}

impl EventHandler {
    pub(crate) fn new(key: GlobalKey, name: impl Into<Arc<str>>, generation: u64) -> Self {
        Self {
            key,
            name: name.into(),
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn key(&self) -> &GlobalKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}@{}", self.key, self.name, self.generation)
    }
}

/// A callback produced by one render.
#[derive(Clone)]
pub struct EventHandlerRecord {
    pub handler: EventHandler,
    pub callback: EventCallback,
}

impl fmt::Debug for EventHandlerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventHandlerRecord").field(&self.handler).finish()
    }
}

struct Bound {
    version: u64,
    callback: EventCallback,
}

/// Maps handler identities to their latest callbacks.
#[derive(Default)]
pub struct EventHandlersController {
    bound: RwLock<HashMap<EventHandler, Bound>>,
}

impl EventHandlersController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the callbacks of generation `version`. A record never replaces
    /// one from a newer generation.
    pub fn rebind<'a>(
        &self,
        version: u64,
        records: impl IntoIterator<Item = &'a EventHandlerRecord>,
    ) {
        let mut bound = self.bound.write();
        for r in records {
            match bound.get_mut(&r.handler) {
                Some(b) if b.version > version => {}
                Some(b) => {
                    b.version = version;
                    b.callback = r.callback.clone();
                }
                None => {
                    bound.insert(
                        r.handler.clone(),
                        Bound {
                            version,
                            callback: r.callback.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Drops handlers whose owner is no longer in the tree.
    pub fn prune(&self, live: &HashSet<GlobalKey>) {
        self.bound.write().retain(|h, _| live.contains(&h.key));
    }

    /// Runs the current callback for `handler`. Returns false when nothing is
    /// bound to it.
    pub fn dispatch(&self, handler: &EventHandler, event: &dyn Any) -> bool {
        // Clone out so the callback can enqueue state updates (and thus
        // trigger renders that rebind) without deadlocking.
        let callback = self.bound.read().get(handler).map(|b| b.callback.clone());
        match callback {
            Some(cb) => {
                cb(event);
                true
            }
            None => {
                log::debug!("no callback bound to {handler:?}");
                false
            }
        }
    }

    pub fn is_bound(&self, handler: &EventHandler) -> bool {
        self.bound.read().contains_key(handler)
    }

    pub fn len(&self) -> usize {
        self.bound.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.read().is_empty()
    }
}
