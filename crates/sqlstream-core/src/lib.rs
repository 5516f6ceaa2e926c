//! Shared vocabulary for the sqlstream MySQL client.
//!
//! This crate holds the types every other sqlstream crate speaks in:
//!
//! - [`Error`] - the error hierarchy and [`Result`] alias
//! - [`OperationState`] / [`OperationResult`] - operation lifecycle
//! - [`ConnectionKey`] - immutable connection identity
//! - [`RowFields`] / [`EphemeralRow`] - raw streamed rows
//!
//! It performs no I/O; the operation engine lives in `sqlstream-client`.

pub mod error;
pub mod key;
pub mod row;
pub mod state;

pub use error::{Error, InvalidOptionError, InvalidStateError, OperationFailedError, Result};
pub use key::ConnectionKey;
pub use row::{EphemeralRow, RowFields};
pub use state::{ClientErrno, FailureReason, OperationResult, OperationState, OperationType};
