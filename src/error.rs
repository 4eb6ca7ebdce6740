//! Error types
//!
//! [`TransportError`] is what a [`CommTransport`](crate::comm::CommTransport)
//! implementation reports for a failed outbound operation. [`Error`] is the
//! crate-level error returned by channel and payload operations.

use thiserror::Error;

/// Failure reported by the transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport has no live connection to the remote peer
    #[error("transport disconnected")]
    Disconnected,

    /// The remote peer refused the request
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// Any other transport-specific failure
    #[error("transport error: {0}")]
    Other(String),
}

/// Crate error type
#[derive(Error, Debug)]
pub enum Error {
    /// An outbound transport operation failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A model payload did not have the expected shape
    #[error("malformed model payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Error {
    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Transport(TransportError::Disconnected) => "transport_disconnected",
            Error::Transport(TransportError::Rejected(_)) => "transport_rejected",
            Error::Transport(TransportError::Other(_)) => "transport_other",
            Error::Payload(_) => "payload_malformed",
        }
    }
}

/// Result alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_transparent() {
        let err: Error = TransportError::Rejected("no such target".into()).into();

        assert_eq!(err.to_string(), "rejected by remote: no such target");
        assert_eq!(err.as_label(), "transport_rejected");
    }

    #[test]
    fn test_payload_error_label() {
        let parse = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err: Error = parse.into();

        assert_eq!(err.as_label(), "payload_malformed");
        assert!(err.to_string().starts_with("malformed model payload"));
    }
}
