//! Render context
//!
//! The composition root handed to whatever renders models. It answers "what
//! does model X look like right now" (together with every model X refers
//! to) and, when a transport is available, gives access to comm channels.

use std::fmt;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::comm::{
    Comm, CommChannel, CommConfig, CommIdGenerator, CommTransport, Message, UuidGenerator,
};
use crate::error::Result;
use crate::locks::{read, write};
use crate::models::{BufferData, ModelStore, ModelSync, StoreConfig};

/// Comm target under which the peer opens widget models
pub const DEFAULT_WIDGET_TARGET: &str = "jupyter.widget";

/// Render context configuration options
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Configuration for every channel the context creates
    pub comm: CommConfig,

    /// Model store configuration
    pub store: StoreConfig,

    /// Comm target the model store is fed from
    pub widget_target: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            comm: CommConfig::default(),
            store: StoreConfig::default(),
            widget_target: DEFAULT_WIDGET_TARGET.to_string(),
        }
    }
}

impl ContextConfig {
    /// Set the channel configuration
    pub fn comm(mut self, comm: CommConfig) -> Self {
        self.comm = comm;
        self
    }

    /// Set the model store configuration
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set the widget comm target
    pub fn widget_target(mut self, target: impl Into<String>) -> Self {
        self.widget_target = target.into();
        self
    }
}

/// Snapshot of one model
#[derive(Debug, Clone)]
pub struct ModelState {
    /// Module providing the model class
    pub module: String,

    /// Model class name
    pub name: String,

    /// Module version, if announced
    pub version: Option<String>,

    /// State at the time of the snapshot
    pub state: Map<String, Value>,

    /// Buffer data at the time of the snapshot
    pub buffers: Option<BufferData>,

    /// Fresh channel bound to the model id (only with a transport)
    pub comm: Option<Comm>,
}

/// Opening and accepting comm channels
#[derive(Clone)]
pub struct Comms {
    transport: Arc<dyn CommTransport>,
    ids: Arc<dyn CommIdGenerator>,
    config: CommConfig,
}

impl Comms {
    /// Create a comm factory on `transport`
    pub fn new(
        transport: Arc<dyn CommTransport>,
        ids: Arc<dyn CommIdGenerator>,
        config: CommConfig,
    ) -> Self {
        Self {
            transport,
            ids,
            config,
        }
    }

    /// Open a new comm under `target`
    ///
    /// `data` defaults to an empty object. If the transport refuses the
    /// open, the channel is released before the error is returned.
    pub async fn open(&self, target: &str, data: Option<Value>, buffers: Vec<Bytes>) -> Result<Comm> {
        let channel = CommChannel::new(
            self.ids.next_id(),
            Arc::clone(&self.transport),
            self.config.clone(),
        );

        let data = data.unwrap_or_else(|| Value::Object(Map::new()));
        channel.open(target, data, buffers).await?;

        Ok(channel.handle())
    }

    /// Call `handler` for every comm the peer opens under `target`
    ///
    /// Replaces any handler previously registered for `target` on the
    /// transport. Opens that arrive once every clone of this `Comms` is gone
    /// are ignored.
    pub fn register_target<F>(&self, target: &str, handler: F)
    where
        F: Fn(Comm, Message) + Send + Sync + 'static,
    {
        let transport = Arc::downgrade(&self.transport);
        let config = self.config.clone();
        let comm_target = target.to_string();

        self.transport.register_target(
            target,
            Arc::new(move |comm_id: String, message: Message| {
                let Some(transport) = transport.upgrade() else {
                    tracing::trace!(comm_id = %comm_id, comm_target = %comm_target, "Open after shutdown ignored");
                    return;
                };

                tracing::info!(comm_id = %comm_id, comm_target = %comm_target, "Comm opened by remote");
                let channel = CommChannel::new(comm_id, transport, config.clone());
                handler(channel.handle(), message);
            }),
        );
    }

    /// Bind a channel to an id that is already open on both sides
    fn bind(&self, comm_id: &str) -> Comm {
        CommChannel::new(comm_id, Arc::clone(&self.transport), self.config.clone()).handle()
    }
}

impl fmt::Debug for Comms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comms").field("config", &self.config).finish()
    }
}

/// Entry point for reading synchronized models
pub struct RenderContext {
    store: Arc<RwLock<ModelStore>>,
    sync: Option<ModelSync>,
    comms: Option<Comms>,
}

impl RenderContext {
    /// A context over an existing store, without a transport
    ///
    /// Snapshots carry no comm and [`comms`](Self::comms) is `None`.
    pub fn new(store: Arc<RwLock<ModelStore>>) -> Self {
        Self {
            store,
            sync: None,
            comms: None,
        }
    }

    /// A context fed by `transport`
    ///
    /// Models opened under the configured widget target are tracked from
    /// now on. Comm ids are random UUIDs unless replaced with
    /// [`with_id_generator`](Self::with_id_generator).
    pub fn connected(transport: Arc<dyn CommTransport>, config: ContextConfig) -> Self {
        let ContextConfig {
            comm,
            store,
            widget_target,
        } = config;

        let store = Arc::new(RwLock::new(ModelStore::with_config(store)));
        let sync = ModelSync::attach(Arc::clone(&transport), Arc::clone(&store), widget_target);
        let comms = Comms::new(transport, Arc::new(UuidGenerator), comm);

        Self {
            store,
            sync: Some(sync),
            comms: Some(comms),
        }
    }

    /// Use `ids` for locally opened comms
    pub fn with_id_generator(mut self, ids: Arc<dyn CommIdGenerator>) -> Self {
        if let Some(comms) = self.comms.as_mut() {
            comms.ids = ids;
        }
        self
    }

    /// Snapshot of model `id` and every model it references
    ///
    /// The requested model comes first. Empty when `id` is not open. With a
    /// transport, each entry carries a new comm bound to that model's id.
    pub fn model_state(&self, id: &str) -> Vec<(String, ModelState)> {
        let snapshot: Vec<(String, ModelState)> = read(&self.store)
            .lookup(id)
            .into_iter()
            .map(|model| {
                let state = ModelState {
                    module: model.module().to_string(),
                    name: model.name().to_string(),
                    version: model.version().map(str::to_owned),
                    state: model.state().clone(),
                    buffers: model.buffers().cloned(),
                    comm: None,
                };
                (model.id().to_string(), state)
            })
            .collect();

        // Channels subscribe to the transport; keep that out of the store lock
        match &self.comms {
            Some(comms) => snapshot
                .into_iter()
                .map(|(id, mut state)| {
                    state.comm = Some(comms.bind(&id));
                    (id, state)
                })
                .collect(),
            None => snapshot,
        }
    }

    /// Comm factory, when a transport is available
    pub fn comms(&self) -> Option<&Comms> {
        self.comms.as_ref()
    }

    /// The model store
    pub fn store(&self) -> &Arc<RwLock<ModelStore>> {
        &self.store
    }

    /// Forget every model, e.g. after the transport reconnected
    pub fn reset(&self) {
        match &self.sync {
            Some(sync) => sync.reset(),
            None => write(&self.store).reset(),
        }
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("models", &read(&self.store).len())
            .field("connected", &self.comms.is_some())
            .finish()
    }
}
