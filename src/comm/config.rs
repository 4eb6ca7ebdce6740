//! Comm channel configuration

/// Comm channel configuration options
#[derive(Debug, Clone)]
pub struct CommConfig {
    /// Pending backlog size at which a channel logs a warning (0 = never)
    ///
    /// Messages that arrive before anyone reads a channel are kept without
    /// limit; this only makes a consumer that never attaches visible.
    pub pending_warn_threshold: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            pending_warn_threshold: 1024,
        }
    }
}

impl CommConfig {
    /// Set the pending backlog warning threshold
    pub fn pending_warn_threshold(mut self, threshold: usize) -> Self {
        self.pending_warn_threshold = threshold;
        self
    }

    /// Never warn about the pending backlog
    pub fn disable_pending_warning(mut self) -> Self {
        self.pending_warn_threshold = 0;
        self
    }
}
