//! Public comm handle

use std::fmt;

use bytes::Bytes;
use serde_json::Value;

use crate::error::Result;

use super::channel::{CommChannel, Messages};

/// Handle to a live comm channel
///
/// This is the only view of a channel that user code gets: it can send,
/// close and read, nothing more. Clones share the same channel.
///
/// # Example
/// ```no_run
/// use futures::StreamExt;
/// use serde_json::json;
///
/// # async fn example(comm: commsync::Comm) -> commsync::Result<()> {
/// let mut messages = comm.messages();
/// comm.send(json!({"method": "ping"})).await?;
///
/// while let Some(message) = messages.next().await {
///     println!("{}: {}", comm.id(), message.data);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Comm {
    channel: CommChannel,
}

impl Comm {
    pub(crate) fn new(channel: CommChannel) -> Self {
        Self { channel }
    }

    /// Comm id
    pub fn id(&self) -> &str {
        self.channel.id()
    }

    /// Send `data` to the peer
    ///
    /// Resolves once the transport accepted the message.
    pub async fn send(&self, data: Value) -> Result<()> {
        self.channel.send(data, Vec::new()).await
    }

    /// Send `data` with binary attachments
    pub async fn send_with_buffers(&self, data: Value, buffers: Vec<Bytes>) -> Result<()> {
        self.channel.send(data, buffers).await
    }

    /// Close the comm
    ///
    /// Never fails; every message stream ends afterwards.
    pub async fn close(&self) {
        self.channel.close().await;
    }

    /// Stream of inbound messages, ending when the comm closes
    ///
    /// Each call returns an independent reader.
    pub fn messages(&self) -> Messages {
        self.channel.messages()
    }

    /// Whether the comm has been closed, locally or by the peer
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::comm::config::CommConfig;
    use crate::comm::memory::{MemoryTransport, OutboundFrame};
    use crate::comm::message::Message;

    #[tokio::test]
    async fn test_handle_round_trip() {
        let transport = MemoryTransport::new();
        let comm = CommChannel::new("c1", Arc::new(transport.clone()), CommConfig::default()).handle();
        let mut messages = comm.messages();

        comm.send(json!("hello")).await.unwrap();
        transport.deliver_message("c1", Message::new(json!("world")));

        assert_eq!(messages.next().await.map(|m| m.data), Some(json!("world")));
        assert_eq!(
            transport.take_sent(),
            vec![OutboundFrame::Message {
                comm_id: "c1".into(),
                message: Message::new(json!("hello")),
            }]
        );

        comm.close().await;
        assert!(comm.is_closed());
        assert_eq!(messages.next().await, None);
        assert_eq!(
            transport.take_sent(),
            vec![OutboundFrame::Close { comm_id: "c1".into() }]
        );
    }
}
