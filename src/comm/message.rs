//! Comm message type

use bytes::Bytes;
use serde_json::Value;

/// A message carried on a comm channel
///
/// `data` is the JSON-structured body. Binary blocks travel out of band in
/// `buffers`; a protocol on top (such as the widget model protocol) says
/// where each one belongs inside `data`.
///
/// Cheap to clone: buffers are reference counted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    /// Structured body
    pub data: Value,
    /// Ordered binary attachments
    pub buffers: Vec<Bytes>,
}

impl Message {
    /// Create a message without binary attachments
    pub fn new(data: Value) -> Self {
        Self {
            data,
            buffers: Vec::new(),
        }
    }

    /// Create a message with binary attachments
    pub fn with_buffers(data: Value, buffers: Vec<Bytes>) -> Self {
        Self { data, buffers }
    }

    /// Buffers as an option, `None` when there are none
    pub fn buffers(&self) -> Option<&[Bytes]> {
        if self.buffers.is_empty() {
            None
        } else {
            Some(&self.buffers)
        }
    }
}

impl From<Value> for Message {
    fn from(data: Value) -> Self {
        Self::new(data)
    }
}
