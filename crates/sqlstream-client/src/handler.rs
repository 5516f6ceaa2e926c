//! Driver interfaces: the non-blocking handler and its connection object.
//!
//! The engine never touches a socket itself. All protocol work happens
//! behind [`MysqlHandler`], whose verbs either finish immediately
//! (`Done`/`Error`) or report `Pending` together with the socket
//! readiness direction the driver is waiting on. A blocking driver (the
//! inline variant) simply never returns `Pending`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlstream_core::{ConnectionKey, EphemeralRow, RowFields};

use crate::options::{CompressionAlgorithm, ConnectionOptions, SslOptionsProvider};

/// Socket readiness direction a pending driver verb is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoInterest {
    Read,
    Write,
    ReadWrite,
}

/// Outcome of a driver verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The verb completed; connection state advanced
    Done,
    /// The verb needs socket readiness before it can make progress
    Pending(IoInterest),
    /// The verb failed; errno/message are readable on the connection
    Error,
}

/// Outcome of advancing to the next result set of a multi-statement
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextResultStatus {
    /// Advanced to the next result set
    Done,
    /// Advanced, and further result sets remain after this one
    MoreResults,
    Pending(IoInterest),
    Error,
}

/// Outcome of fetching one row from a result handle.
#[derive(Debug)]
pub enum FetchRowStatus {
    /// One row was produced
    Row(EphemeralRow),
    /// The result set is exhausted
    End,
    Pending(IoInterest),
    Error,
}

/// Client capability flags passed to [`MysqlHandler::try_connect`].
pub mod capabilities {
    /// Allow `;`-separated multi-statement queries
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    /// Enable wire compression
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    /// Track session state changes (GTIDs, response attributes)
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
}

/// Driver-owned connection state.
///
/// One instance backs one [`Connection`](crate::connection::Connection).
/// The engine only calls these methods from the I/O thread, between
/// handler verbs; implementations do not need interior locking.
pub trait InternalConnection: Send {
    /// Full initialization: allocate driver state and the socket side.
    fn initialize(&mut self);

    /// Re-initialize driver state only, keeping connection-object state.
    /// Used between connect attempts after the prior socket was dropped.
    fn init_mysql_only(&mut self);

    fn has_initialized(&self) -> bool;

    /// Drop the socket and driver state.
    fn close(&mut self);

    /// Last driver errno (0 when the previous verb succeeded).
    fn errno(&self) -> u32;

    /// Last driver error message.
    fn error_message(&self) -> String;

    /// The connection's socket descriptor, or a value <= 0 when the
    /// driver has no usable socket.
    fn socket_descriptor(&self) -> i32;

    /// Whether the TCP (and, if applicable, TLS) handshake has finished.
    fn is_done_with_tcp_handshake(&self) -> bool;

    /// Name of the connect stage the driver is currently in, for
    /// timeout attribution.
    fn connect_stage_name(&self) -> String;

    /// Server connection id, used for best-effort kill.
    fn connection_id(&self) -> u32;

    fn server_version(&self) -> String;

    // -- connect-time configuration ----------------------------------

    fn set_connect_attributes(&mut self, attributes: &HashMap<String, String>);

    fn set_compression(&mut self, algorithm: CompressionAlgorithm);

    /// Apply a TLS provider; returns false when TLS could not be set up.
    fn set_ssl_options_provider(&mut self, provider: &dyn SslOptionsProvider) -> bool;

    fn set_sni_server_name(&mut self, name: &str);

    /// Returns false when the socket option could not be applied.
    fn set_dscp(&mut self, dscp: u8) -> bool;

    /// Driver-level connect timeout (covers the TCP handshake).
    fn set_connect_timeout(&mut self, timeout: Duration);

    /// Install the certificate-validation bridge the driver will invoke
    /// during the TLS handshake.
    fn set_cert_validation_bridge(&mut self, bridge: Arc<crate::connect::CertValidationBridge>);

    /// Hand the established TLS session to the provider for reuse.
    /// Returns true when a session was stored.
    fn store_tls_session(&mut self, provider: &dyn SslOptionsProvider) -> bool;

    fn tls_version(&self) -> Option<String>;

    // -- per-statement results ---------------------------------------

    fn affected_rows(&self) -> u64;

    fn last_insert_id(&self) -> u64;

    /// GTID received with the last OK packet, if session tracking is on.
    fn recv_gtid(&self) -> Option<String>;

    /// Session-state response attributes from the last OK packet.
    fn response_attributes(&self) -> Vec<(String, String)>;

    /// Whether further result sets follow the current one.
    fn more_results_exist(&self) -> bool;

    /// Server reported that no good index was used by the statement.
    fn no_index_used(&self) -> bool;

    /// Downcast hook for driver implementations.
    fn as_any(&mut self) -> &mut dyn Any;
}

/// Result-set handle produced by [`MysqlHandler::get_result`].
pub trait InternalResult: Send {
    /// Column metadata for the rows of this result set.
    fn row_fields(&self) -> Arc<RowFields>;

    /// Downcast hook for driver implementations.
    fn as_any(&mut self) -> &mut dyn Any;
}

/// Non-blocking verbs over an [`InternalConnection`].
///
/// All verbs are invoked from the I/O thread. A verb that returns
/// `Pending` will be re-invoked after the reported readiness arrives;
/// drivers must treat re-invocation as a continuation.
pub trait MysqlHandler: Send + Sync {
    /// Create a fresh driver connection object for `key`.
    fn create_connection(&self, key: &Arc<ConnectionKey>) -> Box<dyn InternalConnection>;

    /// Start or continue connecting.
    fn try_connect(
        &self,
        conn: &mut dyn InternalConnection,
        opts: &ConnectionOptions,
        key: &Arc<ConnectionKey>,
        flags: u32,
    ) -> Status;

    /// Start or continue sending one (possibly multi-statement) query.
    fn run_query(&self, conn: &mut dyn InternalConnection, query: &str) -> Status;

    /// Advance to the next result set of a multi-statement query.
    fn next_result(&self, conn: &mut dyn InternalConnection) -> NextResultStatus;

    /// Number of columns in the current result set (0 for statements
    /// that produce no rows).
    fn get_field_count(&self, conn: &dyn InternalConnection) -> usize;

    /// Obtain the streaming result handle for the current result set.
    /// `None` with a driver error set means the result could not be
    /// initiated.
    fn get_result(&self, conn: &mut dyn InternalConnection) -> Option<Box<dyn InternalResult>>;

    /// Fetch one row from a result handle.
    fn fetch_row(
        &self,
        conn: &mut dyn InternalConnection,
        result: &mut dyn InternalResult,
    ) -> FetchRowStatus;

    /// Start or continue resetting the session state.
    fn reset_conn(&self, conn: &mut dyn InternalConnection) -> Status;

    /// Start or continue re-authenticating as a different user.
    fn change_user(&self, conn: &mut dyn InternalConnection, key: &Arc<ConnectionKey>) -> Status;

    /// Best-effort, asynchronous server-side kill of the query running
    /// on `conn`. Returns true if a kill was dispatched.
    fn kill_running_query(&self, _conn: &dyn InternalConnection) -> bool {
        false
    }
}
