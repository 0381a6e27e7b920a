use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::model::ballot::VoterId;

/// Whether the terminal accepts voter input, and for whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Locked,
    Unlocked(VoterId),
}

/// A transition of the [`LockGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    Unlocked(VoterId),
    Locked,
}

/// Receives every gate transition, synchronously, before the call that
/// caused it returns.
///
/// Observers may query the gate but must not lock or unlock it from inside
/// the callback.
pub trait GateObserver: Send + Sync {
    fn on_gate_event(&self, event: &GateEvent);
}

/// The lock/unlock primitive shared by the poll-worker station and the
/// voting terminal.
pub struct LockGate {
    /// Held for a whole transition, notifications included, so observers
    /// see transitions in the order they happened.
    transition: Mutex<()>,
    state: Mutex<GateState>,
    observers: Mutex<Vec<Arc<dyn GateObserver>>>,
}

impl LockGate {
    /// A locked gate with no observers.
    pub fn new() -> Self {
        Self {
            transition: Mutex::new(()),
            state: Mutex::new(GateState::Locked),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn GateObserver>) {
        lock(&self.observers).push(observer);
    }

    /// Release the terminal for a voter. Ignored, returning false, if the
    /// gate is already unlocked or the identifier is blank.
    pub fn unlock(&self, voter_id: &str) -> bool {
        let Some(voter_id) = VoterId::parse(voter_id) else {
            return false;
        };
        let _transition = lock(&self.transition);
        {
            let mut state = lock(&self.state);
            if *state != GateState::Locked {
                return false;
            }
            *state = GateState::Unlocked(voter_id.clone());
        }
        self.notify(&GateEvent::Unlocked(voter_id));
        true
    }

    /// Lock the terminal. Ignored, returning false, if already locked.
    pub fn lock(&self) -> bool {
        let _transition = lock(&self.transition);
        self.lock_in_transition()
    }

    /// Lock the terminal only if `still_wanted` holds. The check runs inside
    /// the transition, so no unlock or lock can slip in between the check
    /// and the lock.
    ///
    /// `still_wanted` may take locks that observers also take, but must not
    /// call back into the gate's transitions.
    pub fn lock_if(&self, still_wanted: impl FnOnce() -> bool) -> bool {
        let _transition = lock(&self.transition);
        if !still_wanted() {
            return false;
        }
        self.lock_in_transition()
    }

    fn lock_in_transition(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if *state == GateState::Locked {
                return false;
            }
            *state = GateState::Locked;
        }
        self.notify(&GateEvent::Locked);
        true
    }

    pub fn is_locked(&self) -> bool {
        *lock(&self.state) == GateState::Locked
    }

    /// The voter the terminal is unlocked for.
    pub fn current_voter(&self) -> Option<VoterId> {
        match &*lock(&self.state) {
            GateState::Locked => None,
            GateState::Unlocked(voter_id) => Some(voter_id.clone()),
        }
    }

    fn notify(&self, event: &GateEvent) {
        // Snapshot, so observers can subscribe others without deadlocking.
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer.on_gate_event(event);
        }
    }
}

impl Default for LockGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A panicking observer must not wedge the gate forever.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
