//! Asynchronous MySQL client operation engine.
//!
//! This crate drives individual database interactions (connect, fetch,
//! reset, change-user) as explicit state machines over a non-blocking
//! driver. It provides:
//!
//! - [`MysqlHandler`] / [`InternalConnection`] - the driver interface
//! - [`EventLoop`] - scheduling, timers, and socket readiness, with an
//!   inline (synchronous) and a threaded (asynchronous) implementation
//! - [`ConnectOperation`] - attempt-based connect with layered timeouts
//! - [`FetchOperation`] / [`RowStream`] - streaming multi-statement
//!   fetch with pause/resume
//! - [`SpecialOperation`] - session reset and change-user
//! - [`MysqlClient`] / [`Connection`] - the client surface
//!
//! The same operation state machines serve the event-driven and the
//! inline variant; the only difference is the event loop the client is
//! built with.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sqlstream_client::{ConnectionOptions, MysqlClient};
//! use sqlstream_core::ConnectionKey;
//!
//! let client = MysqlClient::asynchronous(Arc::new(driver));
//! let key = ConnectionKey::new("db.internal", 3306, "web", "secret", "prod");
//! let conn = client.connect(key, &ConnectionOptions::new())?;
//! ```

pub mod client;
pub mod connect;
pub mod connection;
pub mod event_loop;
pub mod fetch;
pub mod handler;
pub mod logging;
pub mod operation;
pub mod options;
pub mod special;
pub mod testing;

pub use client::MysqlClient;
pub use connect::{CertValidationBridge, ConnectCallback, ConnectOperation};
pub use connection::{Connection, ConnectionContext};
pub use event_loop::{EventLoop, InlineEventLoop, ThreadedEventLoop};
pub use fetch::{
    FetchAction, FetchCallbacks, FetchContext, FetchOperation, MultiQuery, RowStream,
};
pub use handler::{
    FetchRowStatus, InternalConnection, InternalResult, IoInterest, MysqlHandler,
    NextResultStatus, Status,
};
pub use logging::{ClientStats, CommonLoggingData, DbLogger, TracingLogger};
pub use operation::Operation;
pub use options::{
    CertValidationContext, CertValidationOptions, CertValidatorCallback, CompressionAlgorithm,
    ConnectionOptions, ServerCert, SslOptionsProvider,
};
pub use special::{SpecialOperation, SpecialOperationKind};

pub use sqlstream_core::{
    ClientErrno, ConnectionKey, EphemeralRow, Error, FailureReason, OperationResult,
    OperationState, OperationType, Result, RowFields,
};
