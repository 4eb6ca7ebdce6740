//! Synchronized model document

use bytes::Bytes;
use serde_json::{Map, Value};

use super::payload::{
    BufferPath, ModelPayload, PathSegment, MODEL_MODULE_KEY, MODEL_MODULE_VERSION_KEY,
    MODEL_NAME_KEY,
};

/// Binary buffers attached to a model, each paired with its path
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BufferData {
    buffers: Vec<Bytes>,
    buffer_paths: Vec<BufferPath>,
}

impl BufferData {
    /// Pair `buffers[i]` with `buffer_paths[i]`
    ///
    /// Both lists are stored as received. When the lengths differ, only the
    /// common prefix is paired by [`iter`](Self::iter).
    pub fn new(buffers: Vec<Bytes>, buffer_paths: Vec<BufferPath>) -> Self {
        if buffers.len() != buffer_paths.len() {
            tracing::debug!(
                buffers = buffers.len(),
                paths = buffer_paths.len(),
                "Buffer and path counts differ"
            );
        }
        Self {
            buffers,
            buffer_paths,
        }
    }

    /// Raw buffers, in order
    pub fn buffers(&self) -> &[Bytes] {
        &self.buffers
    }

    /// Buffer paths, in order
    pub fn buffer_paths(&self) -> &[BufferPath] {
        &self.buffer_paths
    }

    /// `(path, buffer)` pairs by position
    pub fn iter(&self) -> impl Iterator<Item = (&BufferPath, &Bytes)> {
        self.buffer_paths.iter().zip(self.buffers.iter())
    }

    /// Buffer stored at `path`
    pub fn get(&self, path: &[PathSegment]) -> Option<&Bytes> {
        self.iter()
            .find(|(candidate, _)| candidate.as_slice() == path)
            .map(|(_, buffer)| buffer)
    }

    /// Number of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether there are no buffers
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// A remotely synchronized key-value state document
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    id: String,
    module: String,
    name: String,
    version: Option<String>,
    state: Map<String, Value>,
    buffers: Option<BufferData>,
}

impl Model {
    /// Build a model from its open payload
    ///
    /// Module, class and version come from the reserved bootstrap keys of
    /// the initial state; later updates to those keys do not change them.
    pub fn from_open(id: impl Into<String>, payload: ModelPayload, buffers: Option<Vec<Bytes>>) -> Self {
        let ModelPayload {
            state,
            buffer_paths,
        } = payload;

        let text = |key: &str| state.get(key).and_then(Value::as_str).map(str::to_owned);

        Self {
            id: id.into(),
            module: text(MODEL_MODULE_KEY).unwrap_or_default(),
            name: text(MODEL_NAME_KEY).unwrap_or_default(),
            version: text(MODEL_MODULE_VERSION_KEY),
            buffers: buffers.map(|b| BufferData::new(b, buffer_paths)),
            state,
        }
    }

    /// Merge a delta
    ///
    /// Keys in the delta overwrite existing keys (no deep merge). New
    /// buffers replace the previous buffer data wholesale; a delta without
    /// buffers keeps it.
    pub fn apply_delta(&mut self, payload: ModelPayload, buffers: Option<Vec<Bytes>>) {
        let ModelPayload {
            state,
            buffer_paths,
        } = payload;

        self.state.extend(state);
        if let Some(buffers) = buffers {
            self.buffers = Some(BufferData::new(buffers, buffer_paths));
        }
    }

    /// Model id (the id of the comm that opened it)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Module providing the model class
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Model class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module version, if announced
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Current state
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// Current buffer data
    pub fn buffers(&self) -> Option<&BufferData> {
        self.buffers.as_ref()
    }
}
