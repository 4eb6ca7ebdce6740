//! Fan-out queue implementation

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};

use crate::locks::lock;

use super::listener::{Listener, ListenerSlot};

struct QueueState<T> {
    listeners: Vec<(u64, Arc<ListenerSlot<T>>)>,
    next_id: u64,
    closed: bool,
}

pub(super) struct QueueShared<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> QueueShared<T> {
    pub(super) fn remove(&self, id: u64) {
        let mut state = lock(&self.state);
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
    }
}

/// Broadcasts pushed values to any number of independent pull-based listeners
///
/// Cloning the queue yields another handle to the same listener set.
pub struct FanoutQueue<T> {
    shared: Arc<QueueShared<T>>,
}

impl<T> FanoutQueue<T> {
    /// Create an open queue with no listeners
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    listeners: Vec::new(),
                    next_id: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Register a new listener
    ///
    /// The listener sees every value pushed from now on. Listening on a
    /// closed queue yields a listener that ends immediately.
    pub fn listen(&self) -> Listener<T> {
        let mut state = lock(&self.shared.state);
        let id = state.next_id;
        state.next_id += 1;

        let slot = Arc::new(ListenerSlot::new(state.closed));
        if !state.closed {
            state.listeners.push((id, Arc::clone(&slot)));
        }

        tracing::trace!(listener = id, closed = state.closed, "Listener registered");

        Listener::new(id, slot, Arc::downgrade(&self.shared))
    }

    /// Close the queue
    ///
    /// Every listener receives end-of-stream after draining what it already
    /// has queued. Further pushes are ignored. Closing twice is a no-op.
    pub fn close(&self) {
        let listeners = {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return;
            }
            state.closed = true;
            mem::take(&mut state.listeners)
        };

        for (_, slot) in listeners {
            slot.close();
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        lock(&self.shared.state).listeners.len()
    }
}

impl<T: Clone> FanoutQueue<T> {
    /// Deliver `value` to every registered listener
    ///
    /// Returns the number of listeners it was delivered to (0 once closed).
    pub fn push(&self, value: T) -> usize {
        let state = lock(&self.shared.state);
        if state.closed {
            return 0;
        }

        for (_, slot) in &state.listeners {
            slot.push(value.clone());
        }
        state.listeners.len()
    }
}

impl<T> Clone for FanoutQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for FanoutQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FanoutQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("FanoutQueue")
            .field("listeners", &state.listeners.len())
            .field("closed", &state.closed)
            .finish()
    }
}
