//! In-process transport
//!
//! [`MemoryTransport`] keeps listeners and targets in memory, records every
//! outbound frame and lets the caller play the remote peer: inject inbound
//! messages, closes and opens, or make the next outbound operation fail.
//!
//! Handlers are always invoked with the internal lock released, so a handler
//! may register or cancel subscriptions on the same transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::locks::lock;

use super::message::Message;
use super::transport::{
    CloseHandler, CommTransport, MessageHandler, OpenHandler, Subscription,
};

type SharedMessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
type SharedCloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Outbound operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `send_open`
    Open,
    /// `send_message`
    Message,
    /// `send_close`
    Close,
}

/// A frame sent through the transport
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// A comm open request
    Open {
        /// Target name on the peer
        target: String,
        /// Comm id being opened
        comm_id: String,
        /// Open payload
        message: Message,
    },
    /// A comm message
    Message {
        /// Comm id
        comm_id: String,
        /// Message payload
        message: Message,
    },
    /// A comm close request
    Close {
        /// Comm id being closed
        comm_id: String,
    },
}

impl OutboundFrame {
    /// Comm id the frame is addressed to
    pub fn comm_id(&self) -> &str {
        match self {
            OutboundFrame::Open { comm_id, .. }
            | OutboundFrame::Message { comm_id, .. }
            | OutboundFrame::Close { comm_id } => comm_id,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    next_listener: u64,
    message_handlers: HashMap<String, Vec<(u64, SharedMessageHandler)>>,
    close_handlers: HashMap<String, Vec<(u64, SharedCloseHandler)>>,
    targets: HashMap<String, OpenHandler>,
    sent: Vec<OutboundFrame>,
    failures: HashMap<Operation, TransportError>,
}

impl MemoryState {
    fn next_listener_id(&mut self) -> u64 {
        let id = self.next_listener;
        self.next_listener += 1;
        id
    }

    fn outbound(&mut self, op: Operation, frame: OutboundFrame) -> Result<(), TransportError> {
        if let Some(err) = self.failures.remove(&op) {
            return Err(err);
        }
        self.sent.push(frame);
        Ok(())
    }
}

/// A [`CommTransport`] whose remote peer is driven by the caller
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `op` fail with `err`
    pub fn fail_next(&self, op: Operation, err: TransportError) {
        lock(&self.state).failures.insert(op, err);
    }

    /// Deliver an inbound message on `comm_id`
    ///
    /// Returns the number of handlers invoked.
    pub fn deliver_message(&self, comm_id: &str, message: Message) -> usize {
        let handlers: Vec<SharedMessageHandler> = lock(&self.state)
            .message_handlers
            .get(comm_id)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(message.clone());
        }
        handlers.len()
    }

    /// Deliver a remote close for `comm_id`
    ///
    /// Close listeners fire at most once: they are removed before being
    /// invoked. Returns the number of handlers invoked.
    pub fn deliver_close(&self, comm_id: &str) -> usize {
        let handlers = lock(&self.state)
            .close_handlers
            .remove(comm_id)
            .unwrap_or_default();

        for (_, handler) in &handlers {
            handler();
        }
        handlers.len()
    }

    /// Deliver a peer-initiated open of `comm_id` under `target`
    ///
    /// Returns `false` when no handler is registered for `target`.
    pub fn deliver_open(&self, target: &str, comm_id: &str, message: Message) -> bool {
        let handler = lock(&self.state).targets.get(target).cloned();
        match handler {
            Some(handler) => {
                handler(comm_id.to_string(), message);
                true
            }
            None => {
                tracing::debug!(comm_target = %target, comm_id = %comm_id, "No handler for comm target");
                false
            }
        }
    }

    /// Frames sent so far
    pub fn sent(&self) -> Vec<OutboundFrame> {
        lock(&self.state).sent.clone()
    }

    /// Frames sent so far, clearing the log
    pub fn take_sent(&self) -> Vec<OutboundFrame> {
        std::mem::take(&mut lock(&self.state).sent)
    }

    /// Number of message listeners registered for `comm_id`
    pub fn message_listener_count(&self, comm_id: &str) -> usize {
        lock(&self.state)
            .message_handlers
            .get(comm_id)
            .map_or(0, Vec::len)
    }

    /// Number of close listeners registered for `comm_id`
    pub fn close_listener_count(&self, comm_id: &str) -> usize {
        lock(&self.state)
            .close_handlers
            .get(comm_id)
            .map_or(0, Vec::len)
    }

    /// Whether a handler is registered for `target`
    pub fn has_target(&self, target: &str) -> bool {
        lock(&self.state).targets.contains_key(target)
    }

    fn subscription<F>(&self, comm_id: &str, id: u64, remove: F) -> Subscription
    where
        F: FnOnce(&mut MemoryState, &str, u64) + Send + 'static,
    {
        let state: Weak<Mutex<MemoryState>> = Arc::downgrade(&self.state);
        let comm_id = comm_id.to_string();
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                let mut guard = lock(&state);
                remove(&mut *guard, comm_id.as_str(), id);
            }
        })
    }
}

#[async_trait]
impl CommTransport for MemoryTransport {
    fn add_message_listener(&self, comm_id: &str, handler: MessageHandler) -> Subscription {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_listener_id();
            state
                .message_handlers
                .entry(comm_id.to_string())
                .or_default()
                .push((id, Arc::from(handler)));
            id
        };

        self.subscription(comm_id, id, |state, comm_id, id| {
            if let Some(list) = state.message_handlers.get_mut(comm_id) {
                list.retain(|(listener, _)| *listener != id);
                if list.is_empty() {
                    state.message_handlers.remove(comm_id);
                }
            }
        })
    }

    fn add_close_listener(&self, comm_id: &str, handler: CloseHandler) -> Subscription {
        let id = {
            let mut state = lock(&self.state);
            let id = state.next_listener_id();
            state
                .close_handlers
                .entry(comm_id.to_string())
                .or_default()
                .push((id, Arc::from(handler)));
            id
        };

        self.subscription(comm_id, id, |state, comm_id, id| {
            if let Some(list) = state.close_handlers.get_mut(comm_id) {
                list.retain(|(listener, _)| *listener != id);
                if list.is_empty() {
                    state.close_handlers.remove(comm_id);
                }
            }
        })
    }

    async fn send_open(
        &self,
        target: &str,
        comm_id: &str,
        message: Message,
    ) -> Result<(), TransportError> {
        lock(&self.state).outbound(
            Operation::Open,
            OutboundFrame::Open {
                target: target.to_string(),
                comm_id: comm_id.to_string(),
                message,
            },
        )
    }

    async fn send_message(&self, comm_id: &str, message: Message) -> Result<(), TransportError> {
        lock(&self.state).outbound(
            Operation::Message,
            OutboundFrame::Message {
                comm_id: comm_id.to_string(),
                message,
            },
        )
    }

    async fn send_close(&self, comm_id: &str) -> Result<(), TransportError> {
        lock(&self.state).outbound(
            Operation::Close,
            OutboundFrame::Close {
                comm_id: comm_id.to_string(),
            },
        )
    }

    fn register_target(&self, target: &str, handler: OpenHandler) {
        lock(&self.state).targets.insert(target.to_string(), handler);
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryTransport")
            .field("comms", &state.message_handlers.len())
            .field("targets", &state.targets.len())
            .field("sent", &state.sent.len())
            .finish()
    }
}
