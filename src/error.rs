//! Error types for call signaling and negotiation

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in signaling and negotiation operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No authenticated identity for an operation that requires one
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// Local media device inaccessible (permission denied or hardware absent)
    #[error("Media unavailable: {0}")]
    Unavailable(String),

    /// Referenced session or invitation document missing when expected
    #[error("Not found: {0}")]
    NotFound(String),

    /// Negotiation operation invoked in a state that does not permit it
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Store read/write failure, eligible for retry
    #[error("Transient store error: {0}")]
    Transient(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a transient store failure eligible for retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Check if this error means local media could not be acquired
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }

    /// Check if this error reports a state-machine misuse
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::ProtocolViolation(_))
    }

    /// Check if this error is fatal to session start (no automatic retry)
    pub fn is_fatal_to_start(&self) -> bool {
        matches!(
            self,
            Error::Unavailable(_) | Error::Unauthenticated(_) | Error::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Unavailable("camera permission denied".to_string());
        assert_eq!(err.to_string(), "Media unavailable: camera permission denied");
    }

    #[test]
    fn test_error_is_transient() {
        assert!(Error::Transient("write failed".to_string()).is_transient());
        assert!(!Error::NotFound("room".to_string()).is_transient());
    }

    #[test]
    fn test_error_is_protocol_violation() {
        assert!(Error::ProtocolViolation("answer before offer".to_string())
            .is_protocol_violation());
        assert!(!Error::Sdp("parse".to_string()).is_protocol_violation());
    }

    #[test]
    fn test_error_is_fatal_to_start() {
        assert!(Error::Unavailable("no device".to_string()).is_fatal_to_start());
        assert!(Error::Unauthenticated("send".to_string()).is_fatal_to_start());
        assert!(!Error::Transient("retry".to_string()).is_fatal_to_start());
    }
}
