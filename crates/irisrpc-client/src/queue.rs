//! FIFO hand-off of inbound requests from the receive loop to the dispatch loop.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    /// Items popped but not yet marked done.
    active: usize,
}

/// Single-consumer work queue with completion tracking.
///
/// Popping an item marks it active until [`task_done`](Self::task_done);
/// [`wait_idle`](Self::wait_idle) returns once nothing is queued or active.
#[derive(Debug)]
pub struct InboundQueue<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> Default for InboundQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InboundQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                active: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
        self.cond.notify_all();
    }

    /// Pop the oldest item, waiting at most `timeout` for one to arrive.
    ///
    /// A timeout past the range of `Instant` waits until an item arrives.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.active += 1;
                return Some(item);
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Mark one popped item as processed.
    pub fn task_done(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.cond.notify_all();
    }

    /// Discard every queued item. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        drop(state);
        self.cond.notify_all();
        dropped
    }

    /// Block until the queue is empty and no popped item is in progress.
    ///
    /// Returns `false` if `timeout` elapsed first; `None`, or a timeout too
    /// large to represent, waits forever.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.lock();
        while !state.items.is_empty() || state.active > 0 {
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
        true
    }

    /// Wake every waiter so it can re-check external state.
    pub fn wake(&self) {
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
