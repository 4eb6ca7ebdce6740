//! Transport contract
//!
//! The core never moves bytes itself. Whatever carries comm traffic between
//! processes (a kernel websocket, an IPC pipe, [`MemoryTransport`] in tests)
//! implements [`CommTransport`] and is expected to deliver inbound traffic
//! for each comm id reliably and in order.
//!
//! [`MemoryTransport`]: super::MemoryTransport

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;

use super::message::Message;

/// Invoked once per inbound message for a comm id, in arrival order
pub type MessageHandler = Box<dyn Fn(Message) + Send + Sync>;

/// Invoked when the remote side closes a comm id
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;

/// Invoked with `(comm_id, open_message)` when a remote peer opens a comm
pub type OpenHandler = Arc<dyn Fn(String, Message) + Send + Sync>;

/// Handle to a registered transport listener
///
/// Cancelling removes the listener. Dropping a subscription cancels it;
/// cancelling more than once is a no-op.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` when released
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to release
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Release the listener now
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Whether the listener is still registered through this handle
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Reliable, ordered, per-comm-id delivery between this process and a peer
#[async_trait]
pub trait CommTransport: Send + Sync {
    /// Listen for inbound messages addressed to `comm_id`
    fn add_message_listener(&self, comm_id: &str, handler: MessageHandler) -> Subscription;

    /// Listen for the remote side closing `comm_id`
    fn add_close_listener(&self, comm_id: &str, handler: CloseHandler) -> Subscription;

    /// Ask the peer to open `comm_id` under `target`
    async fn send_open(
        &self,
        target: &str,
        comm_id: &str,
        message: Message,
    ) -> Result<(), TransportError>;

    /// Send a message on `comm_id`
    async fn send_message(&self, comm_id: &str, message: Message) -> Result<(), TransportError>;

    /// Ask the peer to close `comm_id`
    async fn send_close(&self, comm_id: &str) -> Result<(), TransportError>;

    /// Route peer-initiated opens under `target` to `handler`
    fn register_target(&self, target: &str, handler: OpenHandler);
}
