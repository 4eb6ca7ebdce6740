//! Per-consumer listener
//!
//! Each listener owns a slot with two FIFOs: values that arrived before
//! anyone asked for them, and pulls that are suspended waiting for a value.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::oneshot;

use crate::locks::lock;

use super::queue::QueueShared;

/// Outcome of a pull attempt against a slot
pub(super) enum Pull<T> {
    /// A value (or end-of-stream) was available immediately
    Ready(Option<T>),
    /// The pull is suspended until the next push or close
    Wait(oneshot::Receiver<Option<T>>),
}

struct SlotState<T> {
    queued: VecDeque<T>,
    waiting: VecDeque<oneshot::Sender<Option<T>>>,
    closed: bool,
}

/// Shared half of a listener, held by both the queue and the consumer
pub(super) struct ListenerSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> ListenerSlot<T> {
    pub(super) fn new(closed: bool) -> Self {
        Self {
            state: Mutex::new(SlotState {
                queued: VecDeque::new(),
                waiting: VecDeque::new(),
                closed,
            }),
        }
    }

    /// Resolve the oldest live pull with `value`, or queue it
    pub(super) fn push(&self, value: T) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }

        let mut value = value;
        while let Some(waiter) = state.waiting.pop_front() {
            match waiter.send(Some(value)) {
                Ok(()) => return,
                // The pull was dropped before it resolved; try the next one.
                Err(returned) => match returned {
                    Some(v) => value = v,
                    None => return,
                },
            }
        }

        state.queued.push_back(value);
    }

    /// Mark the slot closed and resolve every suspended pull with end-of-stream
    ///
    /// Values already queued stay readable.
    pub(super) fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        for waiter in state.waiting.drain(..) {
            let _ = waiter.send(None);
        }
    }

    /// Discard queued values and close
    fn cancel(&self) {
        let mut state = lock(&self.state);
        state.queued.clear();
        state.closed = true;
        for waiter in state.waiting.drain(..) {
            let _ = waiter.send(None);
        }
    }

    pub(super) fn pull(&self) -> Pull<T> {
        let mut state = lock(&self.state);
        if let Some(value) = state.queued.pop_front() {
            return Pull::Ready(Some(value));
        }
        if state.closed {
            return Pull::Ready(None);
        }

        // Pulls abandoned before resolving (e.g. timed out) leave dead senders
        state.waiting.retain(|tx| !tx.is_closed());

        let (tx, rx) = oneshot::channel();
        state.waiting.push_back(tx);
        Pull::Wait(rx)
    }

    fn queued_len(&self) -> usize {
        lock(&self.state).queued.len()
    }

    #[cfg(test)]
    fn waiting_len(&self) -> usize {
        lock(&self.state).waiting.len()
    }
}

/// A registered consumer of a [`FanoutQueue`](super::FanoutQueue)
///
/// Observes every value pushed after it was created, in push order, then
/// end-of-stream once the queue closes. Use it as a [`Stream`], or call
/// [`recv`](Self::recv) for individual pulls.
///
/// Dropping the listener, or calling [`cancel`](Self::cancel), removes it
/// from the queue without affecting other listeners.
pub struct Listener<T> {
    id: u64,
    slot: Arc<ListenerSlot<T>>,
    queue: Weak<QueueShared<T>>,
    pending: Option<oneshot::Receiver<Option<T>>>,
}

impl<T> Listener<T> {
    pub(super) fn new(id: u64, slot: Arc<ListenerSlot<T>>, queue: Weak<QueueShared<T>>) -> Self {
        Self {
            id,
            slot,
            queue,
            pending: None,
        }
    }

    /// Listener id, unique within its queue
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Pull the next value
    ///
    /// The pull is registered when `recv` is called, not when the future is
    /// first polled, so concurrent pulls resolve in call order. Resolves to
    /// `None` once the queue is closed and every queued value was read.
    pub fn recv(&self) -> impl Future<Output = Option<T>> + Send + 'static
    where
        T: Send + 'static,
    {
        let pull = self.slot.pull();
        async move {
            match pull {
                Pull::Ready(value) => value,
                Pull::Wait(rx) => rx.await.ok().flatten(),
            }
        }
    }

    /// End iteration early
    ///
    /// Deregisters this listener, drops anything it had queued and resolves
    /// its outstanding pulls with end-of-stream. Siblings are unaffected.
    pub fn cancel(&mut self) {
        self.detach();
        self.slot.cancel();
        self.pending = None;
    }

    /// Number of values delivered to this listener but not yet pulled
    pub fn queued(&self) -> usize {
        self.slot.queued_len()
    }

    fn detach(&self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.remove(self.id);
        }
    }
}

impl<T> Stream for Listener<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        loop {
            if let Some(rx) = this.pending.as_mut() {
                return match Pin::new(rx).poll(cx) {
                    Poll::Ready(result) => {
                        this.pending = None;
                        Poll::Ready(result.ok().flatten())
                    }
                    Poll::Pending => Poll::Pending,
                };
            }

            match this.slot.pull() {
                Pull::Ready(value) => return Poll::Ready(value),
                Pull::Wait(rx) => this.pending = Some(rx),
            }
        }
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_ready_eq, task};

    use super::*;
    use crate::fanout::FanoutQueue;

    #[tokio::test]
    async fn test_timed_out_pulls_do_not_accumulate() {
        let queue = FanoutQueue::<u32>::new();
        let listener = queue.listen();

        for _ in 0..100 {
            let result = tokio::time::timeout(Duration::from_micros(1), listener.recv()).await;
            assert!(result.is_err());
        }
        assert!(listener.slot.waiting_len() <= 1);

        let mut pull = task::spawn(listener.recv());
        assert_eq!(listener.slot.waiting_len(), 1);
        queue.push(5);
        assert_ready_eq!(pull.poll(), Some(5));
        assert_eq!(listener.queued(), 0);
    }
}
