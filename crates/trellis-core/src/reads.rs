use std::cell::RefCell;

use smallvec::SmallVec;

use crate::state::StateKey;

pub type StateReads = SmallVec<[StateKey; 2]>;

thread_local! {
    static READ_SCOPES: RefCell<Vec<StateReads>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` recording every state slot read inside it (not including reads
/// of nested scopes, which record into their own frame).
pub(crate) fn record_reads<R>(f: impl FnOnce() -> R) -> (R, StateReads) {
    // Pops the frame even if `f` unwinds.
    struct Guard {
        armed: bool,
    }
    impl Drop for Guard {
        fn drop(&mut self) {
            if self.armed {
                READ_SCOPES.with(|st| {
                    st.borrow_mut().pop();
                });
            }
        }
    }

    READ_SCOPES.with(|st| st.borrow_mut().push(StateReads::new()));
    let mut guard = Guard { armed: true };
    let result = f();
    guard.armed = false;
    let reads = READ_SCOPES.with(|st| st.borrow_mut().pop()).unwrap_or_default();
    (result, reads)
}

pub(crate) fn register_state_read(key: &StateKey) {
    READ_SCOPES.with(|st| {
        if let Some(top) = st.borrow_mut().last_mut()
            && !top.contains(key)
        {
            top.push(key.clone());
        }
    });
}

/// Whether a render is running on this thread.
pub(crate) fn is_rendering() -> bool {
    READ_SCOPES.with(|st| !st.borrow().is_empty())
}
