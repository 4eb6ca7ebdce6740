//! Model store configuration

/// Default prefix marking a string state value as a model reference
pub const DEFAULT_REFERENCE_PREFIX: &str = "IPY_MODEL_";

/// Model store configuration options
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// State keys whose values reference other models
    ///
    /// Empty by default, in which case a lookup returns only the requested
    /// model.
    pub reference_fields: Vec<String>,

    /// Prefix a string must carry to count as a reference (empty = any string)
    pub reference_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reference_fields: Vec::new(),
            reference_prefix: DEFAULT_REFERENCE_PREFIX.to_string(),
        }
    }
}

impl StoreConfig {
    /// Declare a reference field
    pub fn reference_field(mut self, field: impl Into<String>) -> Self {
        self.reference_fields.push(field.into());
        self
    }

    /// Declare several reference fields
    pub fn reference_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reference_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Set the reference prefix
    pub fn reference_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reference_prefix = prefix.into();
        self
    }

    /// Model id referenced by `value`, if it is a reference string
    pub(crate) fn referenced_id<'a>(&self, value: &'a str) -> Option<&'a str> {
        if self.reference_prefix.is_empty() {
            Some(value)
        } else {
            value.strip_prefix(self.reference_prefix.as_str())
        }
    }
}
