//! Single-shot completion broadcast.
//!
//! Any number of observers subscribe before (or after) a one-time completion.
//! Each subscription is a `oneshot` slot; completing sends the value to every
//! registered slot under the write lock and remembers it, so late subscribers
//! receive it immediately. Sending never waits on an observer.

use parking_lot::RwLock;
use tokio::sync::oneshot;

#[derive(Debug)]
struct State<T> {
    observers: Vec<oneshot::Sender<T>>,
    outcome: Option<T>,
}

#[derive(Debug)]
pub struct Completion<T> {
    state: RwLock<State<T>>,
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                observers: Vec::new(),
                outcome: None,
            }),
        }
    }

    /// Register an observer.
    pub fn subscribe(&self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.write();
        match &state.outcome {
            Some(outcome) => {
                let _ = tx.send(outcome.clone());
            }
            None => state.observers.push(tx),
        }
        rx
    }

    /// Deliver `outcome` to every observer.
    ///
    /// Returns false, delivering nothing, if already completed.
    pub fn complete(&self, outcome: T) -> bool {
        let mut state = self.state.write();
        if state.outcome.is_some() {
            return false;
        }
        for observer in state.observers.drain(..) {
            // receiver gone; nothing to notify
            let _ = observer.send(outcome.clone());
        }
        state.outcome = Some(outcome);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.state.read().outcome.is_some()
    }

    pub fn outcome(&self) -> Option<T> {
        self.state.read().outcome.clone()
    }

    /// Observers waiting for completion.
    pub fn pending(&self) -> usize {
        self.state.read().observers.len()
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}
