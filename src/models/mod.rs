//! Synchronized widget models
//!
//! A model is a key-value state document owned by the remote peer and
//! mirrored here. The peer opens it with a full state, sends shallow deltas
//! and finally closes it.
//!
//! # Architecture
//!
//! ```text
//!   CommTransport
//!        │ open / message / close under the widget target
//!        ▼
//!   ┌─────────────┐  ModelPayload   ┌──────────────────────────────┐
//!   │  ModelSync  │ ──────────────► │ ModelStore                   │
//!   └─────────────┘                 │   id → Model { state, bufs } │
//!                                   └──────────────┬───────────────┘
//!                                                  │ lookup(id)
//!                                                  ▼
//!                                     id + referenced models, once each
//! ```
//!
//! References between models are plain string values such as
//! `"IPY_MODEL_<id>"` stored under the fields declared in [`StoreConfig`].

pub mod config;
pub mod model;
pub mod payload;
pub mod store;
pub mod sync;

pub use config::StoreConfig;
pub use model::{BufferData, Model};
pub use payload::{BufferPath, ModelPayload, PathSegment};
pub use store::ModelStore;
pub use sync::ModelSync;
