//! Widget comm to model store wiring
//!
//! [`ModelSync`] registers the widget comm target on a transport. Every comm
//! the peer opens under it becomes a model: the open payload creates the
//! model, each message on the comm is merged as a delta and the comm's close
//! removes it.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, RwLock, Weak};

use bytes::Bytes;

use crate::comm::{CommTransport, Message, Subscription};
use crate::locks::{lock, read, write};

use super::payload::ModelPayload;
use super::store::ModelStore;

struct SyncShared {
    transport: Arc<dyn CommTransport>,
    store: Arc<RwLock<ModelStore>>,
    target: String,
    /// Transport subscriptions per tracked model id
    tracked: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl SyncShared {
    fn on_open(self: &Arc<Self>, comm_id: String, message: Message) {
        let Some((payload, buffers)) = self.parse(&comm_id, message) else {
            return;
        };

        write(&self.store).on_open(&comm_id, payload, buffers);

        let weak = Arc::downgrade(self);
        let id = comm_id.clone();
        let message_sub = self.transport.add_message_listener(
            &comm_id,
            Box::new(move |message| {
                if let Some(sync) = weak.upgrade() {
                    sync.on_message(&id, message);
                }
            }),
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let id = comm_id.clone();
        let close_sub = self.transport.add_close_listener(
            &comm_id,
            Box::new(move || {
                if let Some(sync) = weak.upgrade() {
                    sync.on_close(&id);
                }
            }),
        );

        // A re-open replaces the previous subscriptions for this id
        let replaced = lock(&self.tracked).insert(comm_id, vec![message_sub, close_sub]);
        drop(replaced);
    }

    fn on_message(&self, comm_id: &str, message: Message) {
        if let Some((payload, buffers)) = self.parse(comm_id, message) {
            write(&self.store).on_message(comm_id, payload, buffers);
        }
    }

    fn on_close(&self, comm_id: &str) {
        write(&self.store).on_close(comm_id);
        let released = lock(&self.tracked).remove(comm_id);
        drop(released);
    }

    fn parse(&self, comm_id: &str, message: Message) -> Option<(ModelPayload, Option<Vec<Bytes>>)> {
        match ModelPayload::from_value(&message.data) {
            Ok(payload) => {
                let buffers = message.buffers().map(<[Bytes]>::to_vec);
                Some((payload, buffers))
            }
            Err(err) => {
                tracing::warn!(
                    model_id = %comm_id,
                    error = %err,
                    "Dropping malformed model payload"
                );
                None
            }
        }
    }
}

/// Keeps a [`ModelStore`] in step with the widget comms of a transport
///
/// Dropping it releases every transport subscription it holds; later opens
/// under its target are ignored.
pub struct ModelSync {
    shared: Arc<SyncShared>,
}

impl ModelSync {
    /// Register `target` on `transport` and feed `store` from its comms
    pub fn attach(
        transport: Arc<dyn CommTransport>,
        store: Arc<RwLock<ModelStore>>,
        target: impl Into<String>,
    ) -> Self {
        let shared = Arc::new(SyncShared {
            transport: Arc::clone(&transport),
            store,
            target: target.into(),
            tracked: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&shared);
        transport.register_target(
            &shared.target,
            Arc::new(move |comm_id: String, message: Message| {
                if let Some(sync) = weak.upgrade() {
                    sync.on_open(comm_id, message);
                }
            }),
        );

        tracing::debug!(comm_target = %shared.target, "Model sync attached");

        Self { shared }
    }

    /// Forget every model and release every subscription
    ///
    /// For transport reconnects: the peer re-announces its models afterwards.
    pub fn reset(&self) {
        write(&self.shared.store).reset();
        let released = mem::take(&mut *lock(&self.shared.tracked));
        drop(released);
    }

    /// The store being synchronized
    pub fn store(&self) -> &Arc<RwLock<ModelStore>> {
        &self.shared.store
    }

    /// Comm target this instance listens on
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    /// Number of models currently tracked on the transport
    pub fn tracked(&self) -> usize {
        lock(&self.shared.tracked).len()
    }
}

impl fmt::Debug for ModelSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSync")
            .field("target", &self.shared.target)
            .field("tracked", &self.tracked())
            .field("models", &read(&self.shared.store).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::comm::MemoryTransport;
    use crate::models::payload::PathSegment;

    const TARGET: &str = "jupyter.widget";

    fn attached() -> (MemoryTransport, ModelSync) {
        let transport = MemoryTransport::new();
        let store = Arc::new(RwLock::new(ModelStore::new()));
        let sync = ModelSync::attach(Arc::new(transport.clone()), store, TARGET);
        (transport, sync)
    }

    fn state_of(sync: &ModelSync, id: &str) -> Option<Value> {
        read(sync.store())
            .get(id)
            .map(|model| Value::Object(model.state().clone()))
    }

    #[test]
    fn test_open_update_close() {
        let (transport, sync) = attached();
        assert!(transport.has_target(TARGET));

        transport.deliver_open(
            TARGET,
            "m1",
            Message::new(json!({"state": {"_model_name": "IntSliderModel", "a": 1, "b": 2}})),
        );
        assert_eq!(sync.tracked(), 1);
        assert_eq!(transport.message_listener_count("m1"), 1);
        assert_eq!(read(sync.store()).get("m1").unwrap().name(), "IntSliderModel");

        transport.deliver_message("m1", Message::new(json!({"method": "update", "state": {"b": 3, "c": 4}})));
        assert_eq!(
            state_of(&sync, "m1"),
            Some(json!({"_model_name": "IntSliderModel", "a": 1, "b": 3, "c": 4}))
        );

        transport.deliver_close("m1");
        assert_eq!(state_of(&sync, "m1"), None);
        assert_eq!(sync.tracked(), 0);
        assert_eq!(transport.message_listener_count("m1"), 0);

        assert_eq!(transport.deliver_message("m1", Message::new(json!({"state": {"a": 9}}))), 0);
        assert!(read(sync.store()).is_empty());
    }

    #[test]
    fn test_buffers_reach_the_model() {
        let (transport, sync) = attached();
        let b0 = Bytes::from_static(b"B0");
        let b1 = Bytes::from_static(b"B1");

        transport.deliver_open(
            TARGET,
            "m1",
            Message::with_buffers(
                json!({"state": {}, "buffer_paths": [["x", "y"], ["z"]]}),
                vec![b0.clone(), b1.clone()],
            ),
        );
        transport.deliver_message("m1", Message::new(json!({"state": {"q": 1}})));

        let store = read(sync.store());
        let data = store.get("m1").unwrap().buffers().unwrap();
        assert_eq!(data.get(&[PathSegment::from("x"), PathSegment::from("y")]), Some(&b0));
        assert_eq!(data.get(&[PathSegment::from("z")]), Some(&b1));
    }

    #[test]
    fn test_malformed_payloads_are_dropped() {
        let (transport, sync) = attached();

        transport.deliver_open(TARGET, "bad", Message::new(json!({"state": "nope"})));
        assert!(read(sync.store()).is_empty());
        assert_eq!(sync.tracked(), 0);

        transport.deliver_open(TARGET, "m1", Message::new(json!({"state": {"a": 1}})));
        transport.deliver_message("m1", Message::new(json!({"state": 5})));
        assert_eq!(state_of(&sync, "m1"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_reopen_replaces_subscriptions() {
        let (transport, sync) = attached();

        transport.deliver_open(TARGET, "m1", Message::new(json!({"state": {"a": 1}})));
        transport.deliver_open(TARGET, "m1", Message::new(json!({"state": {"b": 2}})));

        assert_eq!(transport.message_listener_count("m1"), 1);
        assert_eq!(transport.close_listener_count("m1"), 1);
        assert_eq!(state_of(&sync, "m1"), Some(json!({"b": 2})));
    }

    #[test]
    fn test_reset_releases_everything() {
        let (transport, sync) = attached();
        transport.deliver_open(TARGET, "m1", Message::new(json!({"state": {}})));
        transport.deliver_open(TARGET, "m2", Message::new(json!({"state": {}})));

        sync.reset();

        assert!(read(sync.store()).is_empty());
        assert_eq!(sync.tracked(), 0);
        assert_eq!(transport.message_listener_count("m1"), 0);
        assert_eq!(transport.close_listener_count("m2"), 0);
    }

    #[test]
    fn test_dropped_sync_ignores_opens() {
        let (transport, sync) = attached();
        let store = Arc::clone(sync.store());
        transport.deliver_open(TARGET, "m1", Message::new(json!({"state": {}})));

        drop(sync);

        assert_eq!(transport.message_listener_count("m1"), 0);
        transport.deliver_open(TARGET, "m2", Message::new(json!({"state": {}})));
        assert!(!read(&store).contains("m2"));
    }
}
