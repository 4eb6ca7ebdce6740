//! Pull-based fan-out queue
//!
//! A [`FanoutQueue`] hands every pushed value to each currently registered
//! [`Listener`]. Unlike `tokio::sync::broadcast` there is no ring buffer and
//! no lag: every listener keeps its own FIFO, so a slow consumer never loses
//! values and never holds back its siblings.
//!
//! # Architecture
//!
//! ```text
//!                    FanoutQueue<T>
//!              ┌──────────────────────┐
//!   push(v) ──►│ listeners: [slot..]  │
//!   close() ──►│ closed: bool         │
//!              └──────────┬───────────┘
//!                         │ clone per slot
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!   ListenerSlot    ListenerSlot    ListenerSlot
//!   queued | waiting  (at most one of the two is non-empty)
//!         │               │               │
//!   Listener::next()  recv().await   Listener (dropped -> deregistered)
//! ```
//!
//! A push first resolves the oldest suspended pull of a slot; only when no
//! pull is waiting is the value queued.

pub mod listener;
pub mod queue;

pub use listener::Listener;
pub use queue::FanoutQueue;

