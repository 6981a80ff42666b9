//! # Tree state
//!
//! State lives in a [`TreeState`] scoped to one render tree and outlives
//! individual generations. Updates are appended to a queue and only become
//! visible to the *next* resolve: a resolve works on an immutable
//! [`StateSnapshot`] (the committed values with every pending update applied
//! in enqueue order), and updates enqueued while it runs stay pending.
//!
//! Applied updates leave the queue only when the resolve that consumed them
//! commits, so a discarded resolve loses nothing.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::key::GlobalKey;
use crate::reads;

/// One hook slot: the owning component's key and the hook's call index.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub owner: GlobalKey,
    pub slot: u32,
}

impl StateKey {
    /// The `slot`-th hook of the component at `owner`.
    pub fn new(owner: GlobalKey, slot: u32) -> Self {
        Self { owner, slot }
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.slot)
    }
}

pub type StateValue = Arc<dyn Any + Send + Sync>;

type ApplyFn = Arc<dyn Fn(Option<&StateValue>) -> Option<StateValue> + Send + Sync>;

#[derive(Clone)]
pub enum StateUpdate {
    Set(StateValue),
    /// Computes the next value from the previous one; `None` leaves it as is.
    Apply(ApplyFn),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMode {
    /// Re-render on the calling thread.
    Sync,
    /// Re-render on a worker thread.
    Async,
    /// Do not schedule anything; picked up by the next render.
    Lazy,
}

/// A value remembered by `use_cached`, with the dependencies it was computed
/// from.
#[derive(Clone)]
pub struct CachedEntry {
    pub(crate) deps: StateValue,
    pub(crate) value: StateValue,
}

struct PendingUpdate {
    seq: u64,
    key: StateKey,
    update: StateUpdate,
}

#[derive(Default)]
struct PendingQueue {
    next_seq: u64,
    updates: Vec<PendingUpdate>,
}

#[derive(Clone, Default)]
struct Committed {
    values: Arc<HashMap<StateKey, StateValue>>,
    cached: Arc<HashMap<StateKey, CachedEntry>>,
}

type UpdateListener = Arc<dyn Fn(UpdateMode) + Send + Sync>;

#[derive(Default)]
pub struct TreeState {
    pending: Mutex<PendingQueue>,
    committed: RwLock<Committed>,
    listener: RwLock<Option<UpdateListener>>,
}

/// Immutable view of state for one resolve.
#[derive(Clone, Default)]
pub struct StateSnapshot {
    values: Arc<HashMap<StateKey, StateValue>>,
    cached: Arc<HashMap<StateKey, CachedEntry>>,
    dirty: Arc<HashSet<StateKey>>,
    consumed_seq: u64,
}

impl StateSnapshot {
    pub fn get(&self, key: &StateKey) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub(crate) fn cached(&self, key: &StateKey) -> Option<&CachedEntry> {
        self.cached.get(key)
    }

    /// Keys whose value changed relative to the committed state.
    pub fn dirty(&self) -> &HashSet<StateKey> {
        &self.dirty
    }

    pub fn is_dirty(&self, key: &StateKey) -> bool {
        self.dirty.contains(key)
    }

    /// Sequence number of the last pending update folded into this snapshot.
    pub fn consumed_seq(&self) -> u64 {
        self.consumed_seq
    }
}

impl TreeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, key: StateKey, update: StateUpdate, mode: UpdateMode) {
        {
            let mut q = self.pending.lock();
            q.next_seq += 1;
            let seq = q.next_seq;
            log::trace!("state update #{seq} for {key:?} ({mode:?})");
            q.updates.push(PendingUpdate { seq, key, update });
        }

        // An update from inside a render cannot re-enter the pipeline on this
        // thread.
        let mode = if mode == UpdateMode::Sync && reads::is_rendering() {
            log::warn!("synchronous state update during render; scheduling asynchronously");
            UpdateMode::Async
        } else {
            mode
        };
        if mode == UpdateMode::Lazy {
            return;
        }
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(mode);
        }
    }

    /// Registers the callback that schedules renders for non-lazy updates.
    pub fn set_update_listener(&self, listener: impl Fn(UpdateMode) + Send + Sync + 'static) {
        *self.listener.write() = Some(Arc::new(listener));
    }

    pub fn clear_update_listener(&self) {
        *self.listener.write() = None;
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let q = self.pending.lock();
        let committed = self.committed.read().clone();

        let mut values = committed.values;
        let mut dirty = HashSet::new();
        for p in &q.updates {
            let next = match &p.update {
                StateUpdate::Set(v) => Some(v.clone()),
                StateUpdate::Apply(f) => f(values.get(&p.key)),
            };
            if let Some(v) = next {
                Arc::make_mut(&mut values).insert(p.key.clone(), v);
                dirty.insert(p.key.clone());
            }
        }

        StateSnapshot {
            values,
            cached: committed.cached,
            dirty: Arc::new(dirty),
            consumed_seq: q.updates.last().map_or(0, |p| p.seq),
        }
    }

    /// Publishes the state a resolve ran against, plus the hook values it
    /// initialised, and drops the updates it consumed.
    pub fn commit(
        &self,
        snapshot: &StateSnapshot,
        initial: &[(StateKey, StateValue)],
        cached: &[(StateKey, CachedEntry)],
    ) {
        let mut q = self.pending.lock();
        let mut committed = self.committed.write();

        if !snapshot.dirty.is_empty() {
            let values = Arc::make_mut(&mut committed.values);
            for k in snapshot.dirty.iter() {
                if let Some(v) = snapshot.values.get(k) {
                    values.insert(k.clone(), v.clone());
                }
            }
        }
        merge_initial(&mut committed, initial);
        merge_cached(&mut committed, cached);
        q.updates.retain(|p| p.seq > snapshot.consumed_seq);
    }

    /// Adds hook values initialised outside a resolve commit (nested trees).
    pub(crate) fn commit_initial(
        &self,
        initial: &[(StateKey, StateValue)],
        cached: &[(StateKey, CachedEntry)],
    ) {
        let mut committed = self.committed.write();
        merge_initial(&mut committed, initial);
        merge_cached(&mut committed, cached);
    }

    /// Drops state owned by components that are no longer in the tree.
    pub fn retain_owners(&self, live: &HashSet<GlobalKey>) {
        let mut committed = self.committed.write();
        if committed.values.keys().any(|k| !live.contains(&k.owner)) {
            Arc::make_mut(&mut committed.values).retain(|k, _| live.contains(&k.owner));
        }
        if committed.cached.keys().any(|k| !live.contains(&k.owner)) {
            Arc::make_mut(&mut committed.cached).retain(|k, _| live.contains(&k.owner));
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().updates.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().updates.len()
    }

    /// Committed value of a slot, if any.
    pub fn committed_value<T: Any + Send + Sync + Clone>(&self, key: &StateKey) -> Option<T> {
        self.committed
            .read()
            .values
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }
}

/// Initial hook values never override an existing value of the same type.
fn merge_initial(committed: &mut Committed, initial: &[(StateKey, StateValue)]) {
    if initial.is_empty() {
        return;
    }
    let values = Arc::make_mut(&mut committed.values);
    for (k, v) in initial {
        let keep = values
            .get(k)
            .is_some_and(|existing| (**existing).type_id() == (**v).type_id());
        if !keep {
            values.insert(k.clone(), v.clone());
        }
    }
}

fn merge_cached(committed: &mut Committed, cached: &[(StateKey, CachedEntry)]) {
    if cached.is_empty() {
        return;
    }
    let map = Arc::make_mut(&mut committed.cached);
    for (k, e) in cached {
        map.insert(k.clone(), e.clone());
    }
}

/// A state value as seen by one render, plus a way to update it.
pub struct StateHandle<T> {
    key: StateKey,
    value: Arc<T>,
    updater: StateUpdater<T>,
}

impl<T> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            updater: self.updater.clone(),
        }
    }
}

impl<T: Any + Send + Sync> StateHandle<T> {
    pub(crate) fn new(key: StateKey, value: Arc<T>, state: Arc<TreeState>) -> Self {
        Self {
            updater: StateUpdater::new(key.clone(), state),
            key,
            value,
        }
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        reads::register_state_read(&self.key);
        (*self.value).clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        reads::register_state_read(&self.key);
        f(&self.value)
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn updater(&self) -> StateUpdater<T> {
        self.updater.clone()
    }
}

/// Enqueues updates for one state slot. Cheap to clone and `Send`, so it can
/// be captured by event callbacks.
pub struct StateUpdater<T> {
    key: StateKey,
    state: Arc<TreeState>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for StateUpdater<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            state: self.state.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> StateUpdater<T> {
    pub(crate) fn new(key: StateKey, state: Arc<TreeState>) -> Self {
        Self {
            key,
            state,
            _marker: PhantomData,
        }
    }

    pub fn set(&self, value: T, mode: UpdateMode) {
        self.state
            .enqueue(self.key.clone(), StateUpdate::Set(Arc::new(value)), mode);
    }

    pub fn update(&self, f: impl Fn(&T) -> T + Send + Sync + 'static, mode: UpdateMode) {
        let apply: ApplyFn = Arc::new(move |prev: Option<&StateValue>| {
            let prev = prev?.downcast_ref::<T>()?;
            Some(Arc::new(f(prev)) as StateValue)
        });
        self.state
            .enqueue(self.key.clone(), StateUpdate::Apply(apply), mode);
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }
}
