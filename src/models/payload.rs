//! Widget model protocol payload
//!
//! The `data` of every message on a widget comm has the shape
//!
//! ```text
//! { "state": { key: value, ... }, "buffer_paths": [[seg, ...], ...] }
//! ```
//!
//! `buffer_paths[i]` locates `buffers[i]` inside the state tree.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// State key naming the model's module (read on open only)
pub const MODEL_MODULE_KEY: &str = "_model_module";

/// State key naming the model's class (read on open only)
pub const MODEL_NAME_KEY: &str = "_model_name";

/// State key carrying the module version (read on open only)
pub const MODEL_MODULE_VERSION_KEY: &str = "_model_module_version";

/// One step of a buffer path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// List index
    Index(usize),
    /// Object key
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Key(k) => write!(f, "{}", k),
        }
    }
}

/// Location of a binary buffer within a state tree
pub type BufferPath = Vec<PathSegment>;

/// Payload of a widget comm open or update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPayload {
    /// Full state on open, changed keys on update
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: Map<String, Value>,

    /// One path per attached buffer, in buffer order
    #[serde(default, deserialize_with = "null_as_default")]
    pub buffer_paths: Vec<BufferPath>,
}

impl ModelPayload {
    /// Payload carrying only state
    pub fn new(state: Map<String, Value>) -> Self {
        Self {
            state,
            buffer_paths: Vec::new(),
        }
    }

    /// Set the buffer paths
    pub fn with_buffer_paths(mut self, buffer_paths: Vec<BufferPath>) -> Self {
        self.buffer_paths = buffer_paths;
        self
    }

    /// Parse a comm message body
    ///
    /// Extra keys (such as `method`) are ignored.
    pub fn from_value(data: &Value) -> Result<Self> {
        Ok(Self::deserialize(data)?)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
