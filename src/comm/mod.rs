//! Comm channels
//!
//! A comm is a logical, string-identified message stream multiplexed over a
//! single transport. Either side may open one; both sides may send on it
//! until either closes it.
//!
//! # Architecture
//!
//! ```text
//!   CommTransport (external)
//!        │ add_message_listener(id) / add_close_listener(id)
//!        ▼
//!   ┌──────────────────────────────┐
//!   │ CommChannel                  │
//!   │   pending: [msg, msg, ...]   │  before the first reader drains it
//!   │   queue: FanoutQueue<Message>│
//!   └──────────────┬───────────────┘
//!                  │
//!        ┌─────────┴─────────┐
//!        ▼                   ▼
//!   Comm::messages()    Comm::messages()     independent readers
//! ```
//!
//! User code only ever holds a [`Comm`]; the channel behind it stays private.

pub mod config;
pub mod handle;
pub mod id;
pub mod memory;
pub mod message;
pub mod transport;

pub(crate) mod channel;

pub use channel::Messages;
pub use config::CommConfig;
pub use handle::Comm;
pub use id::{CommIdGenerator, SequentialIds, UuidGenerator};
pub use memory::{MemoryTransport, Operation, OutboundFrame};
pub use message::Message;
pub use transport::{CloseHandler, CommTransport, MessageHandler, OpenHandler, Subscription};

pub(crate) use channel::CommChannel;
