//! Error types for simgym

use thiserror::Error;

/// Result type for simgym operations
pub type Result<T> = std::result::Result<T, GymError>;

/// simgym error types
#[derive(Debug, Error)]
pub enum GymError {
    /// Malformed or unexpected message from the peer
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Encoded message does not fit the channel buffer
    #[error("Payload too large: {len} bytes exceeds channel capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Shared channel failure
    #[error("IPC error: {0}")]
    IpcError(String),

    /// Operation not allowed in the current lifecycle phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Another live bridge already owns the resource
    #[error("Bridge already active for {0}")]
    AlreadyActive(String),

    /// Value does not conform to the space it is encoded against
    #[error("Value does not match space: {0}")]
    SpaceMismatch(String),

    /// The current state record has not been handed to the caller yet
    #[error("Current state has not been consumed, read it before stepping again")]
    StateNotConsumed,

    /// Bridge was closed
    #[error("Bridge is closed")]
    BridgeClosed,

    /// Simulation process could not be started or reached
    #[error("Process error: {0}")]
    ProcessError(String),
}

/// Coarse classification of a [`GymError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The channel or the peer misbehaved; the session is unusable
    Protocol,
    /// The caller broke a precondition
    Usage,
    /// The simulation process is missing or unreachable
    Resource,
}

impl GymError {
    /// Which part of the taxonomy this error belongs to
    pub fn class(&self) -> ErrorClass {
        match self {
            GymError::ProtocolError(_)
            | GymError::PayloadTooLarge { .. }
            | GymError::SerializationError(_)
            | GymError::IpcError(_) => ErrorClass::Protocol,
            GymError::InvalidState(_)
            | GymError::AlreadyActive(_)
            | GymError::SpaceMismatch(_)
            | GymError::StateNotConsumed
            | GymError::BridgeClosed => ErrorClass::Usage,
            GymError::ProcessError(_) => ErrorClass::Resource,
        }
    }
}

impl From<serde_json::Error> for GymError {
    fn from(err: serde_json::Error) -> Self {
        GymError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            GymError::PayloadTooLarge {
                len: 5000,
                capacity: 4096
            }
            .class(),
            ErrorClass::Protocol
        );
        assert_eq!(GymError::StateNotConsumed.class(), ErrorClass::Usage);
        assert_eq!(
            GymError::AlreadyActive("seg".into()).class(),
            ErrorClass::Usage
        );
        assert_eq!(
            GymError::ProcessError("missing".into()).class(),
            ErrorClass::Resource
        );
    }

    #[test]
    fn test_payload_too_large_message() {
        let err = GymError::PayloadTooLarge {
            len: 5000,
            capacity: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Payload too large: 5000 bytes exceeds channel capacity of 4096 bytes"
        );
    }
}
