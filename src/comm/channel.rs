//! Comm channel
//!
//! A [`CommChannel`] binds one comm id on a transport to a
//! [`FanoutQueue`]. Messages that arrive before anyone reads the channel are
//! held in a pending backlog.
//!
//! # Backlog drain
//!
//! The first call to [`messages`](CommChannel::messages) moves the backlog
//! into the stream it returns, ahead of anything newer. From then on inbound
//! messages go straight to the queue, so later streams only see messages
//! that arrive after they were created. Draining only fills listener FIFOs
//! and never runs consumer code, so it is safe inside the call.

use std::fmt;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;

use crate::error::Result;
use crate::fanout::{FanoutQueue, Listener};
use crate::locks::lock;

use super::config::CommConfig;
use super::handle::Comm;
use super::message::Message;
use super::transport::{CommTransport, Subscription};

#[derive(Default)]
struct ChannelState {
    /// A reader was requested and the pending backlog moved into the queue
    drained: bool,
    pending: Vec<Message>,
    backlog_warned: bool,
    closed: bool,
    subscriptions: Vec<Subscription>,
}

pub(crate) struct ChannelShared {
    comm_id: String,
    transport: Arc<dyn CommTransport>,
    queue: FanoutQueue<Message>,
    config: CommConfig,
    state: Mutex<ChannelState>,
}

impl ChannelShared {
    fn on_message(&self, message: Message) {
        let mut state = lock(&self.state);
        if state.closed {
            tracing::trace!(comm_id = %self.comm_id, "Message after close dropped");
            return;
        }

        if state.drained {
            self.queue.push(message);
            return;
        }

        state.pending.push(message);

        let threshold = self.config.pending_warn_threshold;
        if threshold > 0 && !state.backlog_warned && state.pending.len() >= threshold {
            state.backlog_warned = true;
            tracing::warn!(
                comm_id = %self.comm_id,
                pending = state.pending.len(),
                "Comm backlog growing with no reader attached"
            );
        }
    }

    /// Release transport listeners and close the queue
    ///
    /// Idempotent. Values already delivered to readers stay readable.
    fn teardown(&self) {
        let subscriptions = {
            let mut state = lock(&self.state);
            state.closed = true;
            mem::take(&mut state.subscriptions)
        };

        self.queue.close();
        drop(subscriptions);
    }

    fn on_remote_close(&self) {
        tracing::info!(comm_id = %self.comm_id, "Comm closed by remote");
        self.teardown();
    }
}

/// One comm id bound to a transport
#[derive(Clone)]
pub(crate) struct CommChannel {
    shared: Arc<ChannelShared>,
}

impl CommChannel {
    /// Create a channel for `comm_id` and start listening on the transport
    pub(crate) fn new(
        comm_id: impl Into<String>,
        transport: Arc<dyn CommTransport>,
        config: CommConfig,
    ) -> Self {
        let comm_id = comm_id.into();
        let shared = Arc::new(ChannelShared {
            comm_id: comm_id.clone(),
            transport: Arc::clone(&transport),
            queue: FanoutQueue::new(),
            config,
            state: Mutex::new(ChannelState::default()),
        });

        let weak = Arc::downgrade(&shared);
        let message_sub = transport.add_message_listener(
            &comm_id,
            Box::new(move |message| {
                if let Some(channel) = weak.upgrade() {
                    channel.on_message(message);
                }
            }),
        );

        let weak = Arc::downgrade(&shared);
        let close_sub = transport.add_close_listener(
            &comm_id,
            Box::new(move || {
                if let Some(channel) = weak.upgrade() {
                    channel.on_remote_close();
                }
            }),
        );

        let late = {
            let mut state = lock(&shared.state);
            if state.closed {
                // Closed while subscribing; release right away.
                vec![message_sub, close_sub]
            } else {
                state.subscriptions = vec![message_sub, close_sub];
                Vec::new()
            }
        };
        drop(late);

        tracing::debug!(comm_id = %comm_id, "Comm channel created");

        Self { shared }
    }

    /// Comm id
    pub(crate) fn id(&self) -> &str {
        &self.shared.comm_id
    }

    /// Whether the channel has been torn down
    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    /// Number of messages waiting for the first reader
    pub(crate) fn pending_len(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    /// Subscribe to inbound messages
    ///
    /// The first call hands the pending backlog to the returned stream.
    pub(crate) fn messages(&self) -> Messages {
        let mut state = lock(&self.shared.state);
        let listener = self.shared.queue.listen();

        if !state.drained {
            state.drained = true;
            let backlog = mem::take(&mut state.pending);
            tracing::debug!(
                comm_id = %self.shared.comm_id,
                backlog = backlog.len(),
                "First reader attached"
            );
            // The new listener is the only one registered
            for message in backlog {
                self.shared.queue.push(message);
            }
        }

        Messages {
            listener,
            channel: Arc::clone(&self.shared),
        }
    }

    /// Send a message on this comm
    pub(crate) async fn send(&self, data: Value, buffers: Vec<Bytes>) -> Result<()> {
        self.shared
            .transport
            .send_message(&self.shared.comm_id, Message::with_buffers(data, buffers))
            .await?;
        Ok(())
    }

    /// Ask the peer to open its side of this comm under `target`
    ///
    /// On failure the channel is torn down before the error is returned, so
    /// it never stays subscribed to the transport.
    pub(crate) async fn open(&self, target: &str, data: Value, buffers: Vec<Bytes>) -> Result<()> {
        let message = Message::with_buffers(data, buffers);
        let result = self
            .shared
            .transport
            .send_open(target, &self.shared.comm_id, message)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(comm_id = %self.shared.comm_id, comm_target = %target, "Comm opened");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    comm_id = %self.shared.comm_id,
                    comm_target = %target,
                    error = %err,
                    "Comm open failed"
                );
                self.shared.teardown();
                Err(err.into())
            }
        }
    }

    /// Close this comm
    ///
    /// A transport failure is only logged: the peer may already be gone and
    /// there is nothing to retry. The local side is torn down regardless.
    pub(crate) async fn close(&self) {
        if let Err(err) = self.shared.transport.send_close(&self.shared.comm_id).await {
            tracing::warn!(
                comm_id = %self.shared.comm_id,
                error = %err,
                "Error closing comm channel"
            );
        } else {
            tracing::info!(comm_id = %self.shared.comm_id, "Comm closed");
        }
        self.shared.teardown();
    }

    /// Wrap in the public handle
    pub(crate) fn handle(self) -> Comm {
        Comm::new(self)
    }
}

impl fmt::Debug for CommChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("CommChannel")
            .field("comm_id", &self.shared.comm_id)
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Stream of inbound messages on one comm
///
/// Ends when the comm closes. Keeps the channel alive while held. Dropping
/// it, or calling [`cancel`](Self::cancel), stops this reader only.
pub struct Messages {
    listener: Listener<Message>,
    channel: Arc<ChannelShared>,
}

impl Messages {
    /// Stop reading
    pub fn cancel(&mut self) {
        self.listener.cancel();
    }
}

impl Stream for Messages {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        Pin::new(&mut self.get_mut().listener).poll_next(cx)
    }
}

impl fmt::Debug for Messages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messages")
            .field("comm_id", &self.channel.comm_id)
            .field("listener", &self.listener)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;
    use crate::comm::memory::{MemoryTransport, Operation, OutboundFrame};
    use crate::error::{Error, TransportError};

    fn channel(id: &str) -> (MemoryTransport, CommChannel) {
        let transport = MemoryTransport::new();
        let channel = CommChannel::new(id, Arc::new(transport.clone()), CommConfig::default());
        (transport, channel)
    }

    fn msg(n: u32) -> Message {
        Message::new(json!(n))
    }

    async fn data(messages: Messages) -> Vec<Value> {
        messages.map(|m| m.data).collect().await
    }

    #[tokio::test]
    async fn test_backlog_delivered_first_in_order() {
        let (transport, channel) = channel("c1");

        for n in 0..3 {
            transport.deliver_message("c1", msg(n));
        }
        assert_eq!(channel.pending_len(), 3);

        let messages = channel.messages();
        transport.deliver_message("c1", msg(3));
        transport.deliver_close("c1");

        assert_eq!(data(messages).await, vec![json!(0), json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_first_reader_takes_backlog_immediately() {
        let (transport, channel) = channel("c1");
        transport.deliver_message("c1", msg(0));

        let mut messages = channel.messages();
        assert_eq!(channel.pending_len(), 0);

        let mut next = task::spawn(messages.next());
        assert_ready_eq!(next.poll(), Some(msg(0)));
        drop(next);

        let mut next = task::spawn(messages.next());
        assert_pending!(next.poll());
        transport.deliver_message("c1", msg(1));
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Some(msg(1)));
    }

    #[tokio::test]
    async fn test_later_reader_sees_only_newer_messages() {
        let (transport, channel) = channel("c1");
        transport.deliver_message("c1", Message::new(json!("pre")));

        let first = channel.messages();
        tokio::task::yield_now().await;
        transport.deliver_message("c1", Message::new(json!("after-first")));

        let second = channel.messages();
        transport.deliver_message("c1", Message::new(json!("after-second")));
        transport.deliver_close("c1");

        assert_eq!(
            data(first).await,
            vec![json!("pre"), json!("after-first"), json!("after-second")]
        );
        assert_eq!(data(second).await, vec![json!("after-second")]);
    }

    #[tokio::test]
    async fn test_later_readers_skip_backlog() {
        let (transport, channel) = channel("c1");
        transport.deliver_message("c1", msg(0));

        let mut first = channel.messages();
        assert_eq!(first.next().await, Some(msg(0)));

        let second = channel.messages();
        transport.deliver_message("c1", msg(1));
        transport.deliver_close("c1");

        assert_eq!(data(first).await, vec![json!(1)]);
        assert_eq!(data(second).await, vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_two_readers_each_get_every_message() {
        let (transport, channel) = channel("c1");
        let first = channel.messages();
        let second = channel.messages();

        let a = tokio::spawn(data(first));
        let b = tokio::spawn(data(second));
        for n in 0..5 {
            transport.deliver_message("c1", msg(n));
        }
        transport.deliver_close("c1");

        let expected: Vec<Value> = (0..5).map(|n| json!(n)).collect();
        assert_eq!(a.await.unwrap(), expected);
        assert_eq!(b.await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_cancelled_reader_does_not_affect_sibling() {
        let (transport, channel) = channel("c1");
        let mut cancelled = channel.messages();
        let sibling = channel.messages();

        transport.deliver_message("c1", msg(0));
        cancelled.cancel();
        transport.deliver_message("c1", msg(1));
        transport.deliver_close("c1");

        assert_eq!(cancelled.next().await, None);
        assert_eq!(data(sibling).await, vec![json!(0), json!(1)]);
    }

    #[tokio::test]
    async fn test_remote_close_releases_subscriptions() {
        let (transport, channel) = channel("c1");
        assert_eq!(transport.message_listener_count("c1"), 1);
        assert_eq!(transport.close_listener_count("c1"), 1);

        let mut messages = channel.messages();
        transport.deliver_close("c1");

        assert!(channel.is_closed());
        assert_eq!(transport.message_listener_count("c1"), 0);
        assert_eq!(transport.close_listener_count("c1"), 0);
        assert_eq!(messages.next().await, None);
    }

    #[tokio::test]
    async fn test_backlog_survives_close_before_first_poll() {
        let (transport, channel) = channel("c1");
        transport.deliver_message("c1", msg(0));

        let messages = channel.messages();
        transport.deliver_close("c1");

        assert_eq!(data(messages).await, vec![json!(0)]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, channel) = channel("c1");
        let mut messages = channel.messages();

        transport.deliver_close("c1");
        channel.close().await;
        channel.close().await;

        assert!(channel.is_closed());
        assert_eq!(messages.next().await, None);
        assert_eq!(channel.messages().next().await, None);
    }

    #[tokio::test]
    async fn test_close_failure_still_closes() {
        let (transport, channel) = channel("c1");
        let mut messages = channel.messages();
        transport.fail_next(Operation::Close, TransportError::Disconnected);

        channel.close().await;

        assert!(channel.is_closed());
        assert_eq!(messages.next().await, None);
        assert_eq!(transport.message_listener_count("c1"), 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_forwards_to_transport() {
        let (transport, channel) = channel("c1");
        let buffer = Bytes::from_static(b"\x00\x01");

        channel.send(json!({"x": 1}), vec![buffer.clone()]).await.unwrap();

        assert_eq!(
            transport.sent(),
            vec![OutboundFrame::Message {
                comm_id: "c1".into(),
                message: Message::with_buffers(json!({"x": 1}), vec![buffer]),
            }]
        );
    }

    #[tokio::test]
    async fn test_send_propagates_transport_error() {
        let (transport, channel) = channel("c1");
        transport.fail_next(Operation::Message, TransportError::Rejected("busy".into()));

        let result = channel.send(json!(null), Vec::new()).await;

        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::Rejected(_)))
        ));
        // A failed send does not close the channel.
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_open_failure_tears_down() {
        let (transport, channel) = channel("c1");
        transport.fail_next(Operation::Open, TransportError::Rejected("no target".into()));

        let result = channel.open("missing", json!({}), Vec::new()).await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(channel.is_closed());
        assert_eq!(transport.message_listener_count("c1"), 0);
        assert_eq!(transport.close_listener_count("c1"), 0);
    }

    #[tokio::test]
    async fn test_messages_after_close_are_dropped() {
        let (transport, channel) = channel("c1");
        channel.close().await;

        assert_eq!(transport.deliver_message("c1", msg(0)), 0);
        assert_eq!(channel.pending_len(), 0);
    }

    #[test]
    fn test_dropping_channel_releases_subscriptions() {
        let (transport, channel) = channel("c1");
        drop(channel);

        assert_eq!(transport.message_listener_count("c1"), 0);
        assert_eq!(transport.close_listener_count("c1"), 0);
    }
}
