//! Per-name build ownership
//!
//! At most one thread builds a given name at a time. A thread needing a name
//! that another thread is building waits for that build to finish; threads
//! working on unrelated names never wait on each other. Before waiting, the
//! chain of waiting threads is followed: if it leads back to the caller the
//! wait would never end, and the caller is told so instead of blocking.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::thread::{self, ThreadId};

#[derive(Default)]
struct GateState {
    /// Name to the thread building it
    owners: HashMap<String, ThreadId>,
    /// Thread to the name it is waiting on
    waiting: HashMap<ThreadId, String>,
}

/// Outcome of [`BuildGate::claim`].
pub(crate) enum Claim<'a> {
    /// The calling thread now builds the name until the guard drops
    Owner(BuildGuard<'a>),
    /// `finished` reported the result present
    Finished,
    /// Already being built further up the calling thread's stack
    Reentrant,
    /// Owned by a thread that is (transitively) waiting on the caller
    WouldDeadlock,
}

/// Who is building a name, as seen by [`BuildGate::wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Building {
    Nobody,
    ThisThread,
    /// Another thread that is (transitively) waiting on the caller
    Deadlocked,
}

pub(crate) struct BuildGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl BuildGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            released: Condvar::new(),
        }
    }

    /// Take ownership of `name`, waiting while another thread holds it.
    ///
    /// `finished` is checked under the gate before each attempt so a result
    /// completed by the previous owner is picked up instead of rebuilt.
    pub fn claim(&self, name: &str, finished: impl Fn() -> bool) -> Claim<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if finished() {
                return Claim::Finished;
            }
            match state.owners.get(name).copied() {
                None => {
                    state.owners.insert(name.to_string(), me);
                    return Claim::Owner(BuildGuard {
                        gate: self,
                        name: name.to_string(),
                    });
                }
                Some(owner) if owner == me => return Claim::Reentrant,
                Some(owner) if waits_on(&state, owner, me) => return Claim::WouldDeadlock,
                Some(_) => self.wait(&mut state, name, me),
            }
        }
    }

    /// Wait until no other thread is building `name`.
    ///
    /// Returns immediately when the caller itself is the builder, or when
    /// waiting would deadlock.
    pub fn wait_for(&self, name: &str) -> Building {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owners.get(name).copied() {
                None => return Building::Nobody,
                Some(owner) if owner == me => return Building::ThisThread,
                Some(owner) if waits_on(&state, owner, me) => return Building::Deadlocked,
                Some(_) => self.wait(&mut state, name, me),
            }
        }
    }

    /// Whether any thread is building `name` right now.
    pub fn is_building(&self, name: &str) -> bool {
        self.state.lock().owners.contains_key(name)
    }

    fn wait(&self, state: &mut parking_lot::MutexGuard<'_, GateState>, name: &str, me: ThreadId) {
        state.waiting.insert(me, name.to_string());
        self.released.wait(state);
        state.waiting.remove(&me);
    }
}

impl Default for BuildGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Follow the wait chain starting at `owner`; true if it reaches `me`.
fn waits_on(state: &GateState, owner: ThreadId, me: ThreadId) -> bool {
    let mut thread = owner;
    for _ in 0..=state.waiting.len() {
        let Some(next) = state
            .waiting
            .get(&thread)
            .and_then(|name| state.owners.get(name))
            .copied()
        else {
            return false;
        };
        if next == me {
            return true;
        }
        thread = next;
    }
    false
}

/// Ownership of one name; released on drop, including during unwinding.
pub(crate) struct BuildGuard<'a> {
    gate: &'a BuildGate,
    name: String,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.lock().owners.remove(&self.name);
        self.gate.released.notify_all();
    }
}
