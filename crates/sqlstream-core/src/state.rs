//! Operation lifecycle states, results, and client error codes.

use std::fmt;

/// Lifecycle state of an operation.
///
/// Transitions form a DAG: `Unstarted -> Pending` on run,
/// `Pending -> Cancelling` on a cancel request, and
/// `{Pending, Cancelling} -> Completed` once the operation resolves.
/// No operation ever re-enters a prior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Created but not yet run
    Unstarted,
    /// Running on the I/O thread (possibly parked on a socket or pause)
    Pending,
    /// Cancellation requested, not yet resolved by the I/O thread
    Cancelling,
    /// Terminal: the result is now valid
    Completed,
}

impl OperationState {
    /// Check whether a transition to `next` is allowed.
    pub const fn can_transition_to(self, next: OperationState) -> bool {
        matches!(
            (self, next),
            (OperationState::Unstarted, OperationState::Pending)
                | (OperationState::Pending, OperationState::Cancelling)
                | (OperationState::Pending, OperationState::Completed)
                | (OperationState::Cancelling, OperationState::Completed)
        )
    }

    /// Human-readable name, used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            OperationState::Unstarted => "Unstarted",
            OperationState::Pending => "Pending",
            OperationState::Cancelling => "Cancelling",
            OperationState::Completed => "Completed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a completed operation.
///
/// `Unknown` is only observable before the operation reaches
/// [`OperationState::Completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Not yet completed
    Unknown,
    /// Completed successfully
    Succeeded,
    /// Completed with a database or initialization error
    Failed,
    /// Completed because a timeout fired
    TimedOut,
    /// Completed because the user cancelled it
    Cancelled,
}

impl OperationResult {
    pub const fn name(self) -> &'static str {
        match self {
            OperationResult::Unknown => "Unknown",
            OperationResult::Succeeded => "Succeeded",
            OperationResult::Failed => "Failed",
            OperationResult::TimedOut => "TimedOut",
            OperationResult::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of operation, reported to logging sinks and used to decide
/// connect-completion side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Connect,
    Query,
    MultiQuery,
    ResetConn,
    ChangeUser,
}

impl OperationType {
    pub const fn name(self) -> &'static str {
        match self {
            OperationType::Connect => "Connect",
            OperationType::Query => "Query",
            OperationType::MultiQuery => "MultiQuery",
            OperationType::ResetConn => "ResetConn",
            OperationType::ChangeUser => "ChangeUser",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure classification handed to logging sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    DatabaseError,
    Timeout,
    Cancelled,
}

impl FailureReason {
    /// Classify a terminal operation result.
    pub const fn from_result(result: OperationResult) -> FailureReason {
        match result {
            OperationResult::TimedOut => FailureReason::Timeout,
            OperationResult::Cancelled => FailureReason::Cancelled,
            _ => FailureReason::DatabaseError,
        }
    }
}

/// Client-generated error codes, reported alongside server errnos.
///
/// These occupy a private range well above the MySQL server/client
/// ranges so they can never collide with an upstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClientErrno {
    /// Driver initialization produced an unusable connection
    InitializationFailed = 7000,
    /// A connect attempt timed out
    ConnTimeout = 7001,
    /// A connect attempt timed out while the event loop was stalled
    ConnTimeoutLoopStalled = 7002,
}

impl ClientErrno {
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Well-known MySQL client errnos surfaced by drivers.
pub mod mysql_errno {
    /// Lost connection to MySQL server
    pub const CR_SERVER_LOST: u32 = 2013;
    /// Can't connect to MySQL server (host error)
    pub const CR_CONN_HOST_ERROR: u32 = 2003;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_form_a_dag() {
        use OperationState::*;

        assert!(Unstarted.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Cancelling));
        assert!(Pending.can_transition_to(Completed));
        assert!(Cancelling.can_transition_to(Completed));

        // No transition re-enters a prior state.
        assert!(!Pending.can_transition_to(Unstarted));
        assert!(!Cancelling.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Unstarted));
        assert!(!Unstarted.can_transition_to(Completed));
    }

    #[test]
    fn failure_reason_classification() {
        assert_eq!(
            FailureReason::from_result(OperationResult::TimedOut),
            FailureReason::Timeout
        );
        assert_eq!(
            FailureReason::from_result(OperationResult::Cancelled),
            FailureReason::Cancelled
        );
        assert_eq!(
            FailureReason::from_result(OperationResult::Failed),
            FailureReason::DatabaseError
        );
    }

    #[test]
    fn client_errno_codes_are_stable() {
        assert_eq!(ClientErrno::InitializationFailed.code(), 7000);
        assert_eq!(ClientErrno::ConnTimeout.code(), 7001);
        assert_eq!(ClientErrno::ConnTimeoutLoopStalled.code(), 7002);
    }
}
