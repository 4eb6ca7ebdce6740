//! commsync: comm channel multiplexing and widget model synchronization
//!
//! A comm is a string-identified message stream carried by some external
//! transport. This crate sits on top of that transport and provides:
//!
//! - [`FanoutQueue`]: exactly-once, in-order delivery of every pushed value
//!   to any number of independently pulling listeners
//! - [`Comm`]: a channel that buffers inbound messages until someone reads
//!   them and fans them out to every reader afterwards
//! - [`ModelStore`]: remote key-value documents ("models") kept up to date
//!   from open, delta and close events, with reference-closure lookup
//! - [`RenderContext`]: model snapshots paired with live comms
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use commsync::{ContextConfig, MemoryTransport, RenderContext};
//!
//! # async fn example() -> commsync::Result<()> {
//! let transport = MemoryTransport::new();
//! let context = RenderContext::connected(Arc::new(transport.clone()), ContextConfig::default());
//!
//! for (id, state) in context.model_state("some-model") {
//!     println!("{} is a {}", id, state.name);
//! }
//!
//! if let Some(comms) = context.comms() {
//!     let comm = comms.open("echo", None, Vec::new()).await?;
//!     comm.close().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod comm;
pub mod context;
pub mod error;
pub mod fanout;
pub mod models;

mod locks;

pub use comm::{
    Comm, CommConfig, CommIdGenerator, CommTransport, MemoryTransport, Message, Messages,
    SequentialIds, Subscription, UuidGenerator,
};
pub use context::{Comms, ContextConfig, ModelState, RenderContext};
pub use error::{Error, Result, TransportError};
pub use fanout::{FanoutQueue, Listener};
pub use models::{Model, ModelPayload, ModelStore, ModelSync, StoreConfig};
