//! Error types for sqlstream operations.

use std::fmt;

use crate::state::{OperationResult, OperationState, OperationType};

/// The primary error type surfaced by sqlstream APIs.
///
/// Protocol-level failures (server errnos, timeouts) are reported through
/// an operation's result and error snapshot, not through this type; this
/// enum covers the synchronous API surface.
#[derive(Debug)]
pub enum Error {
    /// A setter or accessor was called outside its permitted state window
    InvalidState(InvalidStateError),
    /// `must_succeed` observed a result other than `Succeeded`
    OperationFailed(OperationFailedError),
    /// A configuration value was rejected
    InvalidOption(InvalidOptionError),
    /// Custom error with message
    Custom(String),
}

/// A method was called while the operation was in the wrong state.
#[derive(Debug)]
pub struct InvalidStateError {
    /// The method that was refused
    pub what: &'static str,
    /// The state the operation was actually in
    pub state: OperationState,
}

/// A required operation completed with a non-success result.
#[derive(Debug)]
pub struct OperationFailedError {
    pub op_type: OperationType,
    pub result: OperationResult,
    /// Snapshotted MySQL errno (0 if none was produced)
    pub errno: u32,
    /// Snapshotted error message
    pub message: String,
}

/// A configuration value was out of range or otherwise unusable.
#[derive(Debug)]
pub struct InvalidOptionError {
    /// The option that was rejected
    pub option: &'static str,
    pub message: String,
}

impl Error {
    /// Shorthand for the invalid-state case.
    pub fn invalid_state(what: &'static str, state: OperationState) -> Error {
        Error::InvalidState(InvalidStateError { what, state })
    }

    /// Is this an invalid-state error?
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState(_))
    }

    /// Snapshotted errno for a failed required operation, if any.
    pub fn errno(&self) -> Option<u32> {
        match self {
            Error::OperationFailed(e) => Some(e.errno),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState(e) => write!(f, "Invalid state: {}", e),
            Error::OperationFailed(e) => write!(f, "Operation failed: {}", e),
            Error::InvalidOption(e) => write!(f, "Invalid option: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is not allowed while the operation is {}",
            self.what, self.state
        )
    }
}

impl fmt::Display for OperationFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errno != 0 {
            write!(
                f,
                "{} {}: [{}] {}",
                self.op_type, self.result, self.errno, self.message
            )
        } else {
            write!(f, "{} {}: {}", self.op_type, self.result, self.message)
        }
    }
}

impl fmt::Display for InvalidOptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.option, self.message)
    }
}

impl From<InvalidStateError> for Error {
    fn from(err: InvalidStateError) -> Self {
        Error::InvalidState(err)
    }
}

impl From<OperationFailedError> for Error {
    fn from(err: OperationFailedError) -> Self {
        Error::OperationFailed(err)
    }
}

impl From<InvalidOptionError> for Error {
    fn from(err: InvalidOptionError) -> Self {
        Error::InvalidOption(err)
    }
}

/// Result type alias for sqlstream operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_display() {
        let err = Error::invalid_state("set_connect_attempts", OperationState::Pending);
        assert_eq!(
            err.to_string(),
            "Invalid state: set_connect_attempts is not allowed while the operation is Pending"
        );
        assert!(err.is_invalid_state());
    }

    #[test]
    fn operation_failed_display_includes_errno() {
        let err = Error::OperationFailed(OperationFailedError {
            op_type: OperationType::Connect,
            result: OperationResult::TimedOut,
            errno: 2013,
            message: "timed out".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Operation failed: Connect TimedOut: [2013] timed out"
        );
        assert_eq!(err.errno(), Some(2013));
    }

    #[test]
    fn operation_failed_display_without_errno() {
        let err = Error::OperationFailed(OperationFailedError {
            op_type: OperationType::Query,
            result: OperationResult::Cancelled,
            errno: 0,
            message: "cancelled by user".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Operation failed: Query Cancelled: cancelled by user"
        );
    }
}
