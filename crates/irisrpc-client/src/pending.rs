//! Pending-call table: correlates responses with the callers waiting on them.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use irisrpc_u64json::Response;
use tracing::debug;

use crate::error::{Result, RpcError};

#[derive(Debug)]
struct State {
    /// `None` while waiting, `Some` once the response arrived.
    slots: HashMap<u64, Option<Response>>,
    connected: bool,
}

/// Slots keyed by request id, plus the connected flag, under one mutex.
///
/// Every state change wakes all waiters; each waiter only ever claims the
/// slot for its own id, so a response is delivered exactly once.
#[derive(Debug)]
pub struct PendingCalls {
    state: Mutex<State>,
    cond: Condvar,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCalls {
    /// An empty table in the connected state.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slots: HashMap::new(),
                connected: true,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a slot for `id`. Must happen before the request is sent.
    pub fn register(&self, id: u64) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(RpcError::NotConnected("connection is closed".to_string()));
        }
        state.slots.insert(id, None);
        Ok(())
    }

    /// Hand a response to its waiter.
    ///
    /// Returns `false` if nobody waits for this id (late response after a
    /// timeout, or an id this client never sent); the response is dropped.
    pub fn complete(&self, response: Response) -> bool {
        let id = response.id;
        let mut state = self.lock();
        match state.slots.get_mut(&id) {
            Some(slot) if slot.is_none() => *slot = Some(response),
            Some(_) => {
                debug!(id, "duplicate response dropped");
                return false;
            }
            None => {
                debug!(id, "response without pending call dropped");
                return false;
            }
        }
        drop(state);
        self.cond.notify_all();
        true
    }

    /// Block until the response for `id` arrives, `timeout` elapses, or the
    /// connection is declared dead. The slot is removed in every case.
    pub fn wait(&self, id: u64, timeout: Duration) -> Result<Response> {
        // A timeout too large for `Instant` means wait without one.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if matches!(state.slots.get(&id), Some(Some(_))) {
                if let Some(Some(response)) = state.slots.remove(&id) {
                    return Ok(response);
                }
            }
            if !state.slots.contains_key(&id) {
                return Err(RpcError::NotConnected(format!(
                    "request {id:#x} is not pending"
                )));
            }
            if !state.connected {
                state.slots.remove(&id);
                return Err(RpcError::NotConnected(
                    "connection closed while waiting for response".to_string(),
                ));
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.slots.remove(&id);
                        return Err(RpcError::Timeout { id, after: timeout });
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

    /// Drop the slot for `id`, e.g. when sending the request failed.
    pub fn cancel(&self, id: u64) {
        self.lock().slots.remove(&id);
    }

    /// Mark the connection closed and wake every waiter.
    pub fn disconnect(&self) {
        self.lock().connected = false;
        self.cond.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Number of open slots.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
