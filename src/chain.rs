//! Sequential continuation list.
//!
//! Unrolling a remote object graph takes one protocol round trip per level,
//! and naive recursion over protocol callbacks both risks overflowing the
//! native stack and serializes incorrectly under callback ordering. The
//! chain replaces recursion with an explicit list of continuations executed
//! last-in-first-served, with a terminal `complete` callback that fires
//! exactly once no matter which paths run.

use crate::error::Error;
use crate::muted_error;
use std::sync::{Arc, Mutex};

type Callback<T> = Box<dyn FnOnce(&CallbackChain<T>, T) -> Result<(), Error> + Send>;
type Complete<T> = Box<dyn FnOnce(T) + Send>;

struct ChainState<T> {
    callbacks: Vec<Callback<T>>,
    complete: Option<Complete<T>>,
}

/// A shareable chain of continuations over an accumulator of type `T`.
///
/// `next` pops the most recently added continuation and runs it with the
/// current accumulator; when none remain the terminal callback fires. If a
/// continuation fails, the chain forces completion with the most recent
/// accumulator instead of propagating the error: forward progress here is
/// worth more than strict correctness, the paused process must resume.
pub struct CallbackChain<T> {
    state: Arc<Mutex<ChainState<T>>>,
}

impl<T> Clone for CallbackChain<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> CallbackChain<T> {
    pub fn new(complete: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                callbacks: vec![],
                complete: Some(Box::new(complete)),
            })),
        }
    }

    /// Push a continuation. Continuations run in reverse addition order.
    pub fn add(
        &self,
        callback: impl FnOnce(&CallbackChain<T>, T) -> Result<(), Error> + Send + 'static,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Run the next continuation, or complete the chain if none remain.
    /// Calls after completion are silently absorbed.
    pub fn next(&self, result: T) {
        // the lock is released before the continuation runs, so a
        // continuation may call `next` again synchronously
        let popped = match self.state.lock() {
            Ok(mut state) => state.callbacks.pop(),
            Err(_) => return,
        };

        match popped {
            Some(callback) => {
                let fallback = result.clone();
                if muted_error!(callback(self, result), "frame unrolling interrupted:").is_none() {
                    self.complete(fallback);
                }
            }
            None => self.complete(result),
        }
    }

    fn complete(&self, result: T) {
        let complete = match self.state.lock() {
            Ok(mut state) => {
                state.callbacks.clear();
                state.complete.take()
            }
            Err(_) => None,
        };

        if let Some(complete) = complete {
            complete(result)
        }
    }
}
