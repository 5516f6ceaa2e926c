//! An established MySQL connection and its context.
//!
//! A `Connection` hosts at most one active operation at a time; the
//! `begin_*` constructors consume the connection into the operation, and
//! [`Operation::release_connection`](crate::operation::Operation::release_connection)
//! hands it back after completion. The synchronous/asynchronous split
//! lives entirely in the client's event loop; there is one connection
//! type.

use std::sync::Arc;

use sqlstream_core::ConnectionKey;

use crate::client::MysqlClient;
use crate::event_loop::LoopTask;
use crate::fetch::{FetchCallbacks, FetchOperation, MultiQuery};
use crate::handler::{InternalConnection, Status};
use crate::options::ConnectionOptions;
use crate::special::SpecialOperation;

/// Facts gathered while connecting, reported to logging sinks.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub is_ssl_connection: bool,
    pub ssl_session_reused: bool,
    pub ssl_version: Option<String>,
    /// Server version string reported by the endpoint
    pub endpoint_version: Option<String>,
}

/// A driver connection plus the engine-side state that travels with it.
pub struct Connection {
    client: MysqlClient,
    key: Arc<ConnectionKey>,
    internal: Box<dyn InternalConnection>,
    options: ConnectionOptions,
    kill_on_query_timeout: bool,
    context: ConnectionContext,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("kill_on_query_timeout", &self.kill_on_query_timeout)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(client: MysqlClient, key: Arc<ConnectionKey>) -> Self {
        let internal = client.handler().create_connection(&key);
        Self {
            client,
            key,
            internal,
            options: ConnectionOptions::default(),
            kill_on_query_timeout: false,
            context: ConnectionContext::default(),
        }
    }

    pub fn key(&self) -> &Arc<ConnectionKey> {
        &self.key
    }

    pub fn client(&self) -> &MysqlClient {
        &self.client
    }

    /// Options transferred from the connect operation.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn kill_on_query_timeout(&self) -> bool {
        self.kill_on_query_timeout
    }

    /// Server version of the connected endpoint.
    pub fn server_version(&self) -> Option<String> {
        if self.internal.has_initialized() {
            Some(self.internal.server_version())
        } else {
            None
        }
    }

    /// Post work onto the thread that owns this connection's I/O. Under
    /// the inline loop the work runs before this returns.
    pub fn run_in_thread(&self, task: LoopTask) -> bool {
        self.client.event_loop().run_in_loop(task)
    }

    /// Start a single-statement query.
    pub fn begin_query(
        self,
        sql: impl Into<String>,
        callbacks: Box<dyn FetchCallbacks>,
    ) -> Arc<FetchOperation> {
        FetchOperation::create(self, MultiQuery::single(sql), callbacks)
    }

    /// Start a multi-statement query.
    pub fn begin_multi_query(
        self,
        queries: MultiQuery,
        callbacks: Box<dyn FetchCallbacks>,
    ) -> Arc<FetchOperation> {
        FetchOperation::create(self, queries, callbacks)
    }

    /// Start a session reset.
    pub fn begin_reset(self) -> Arc<SpecialOperation> {
        SpecialOperation::create_reset(self)
    }

    /// Start re-authentication as a different user.
    pub fn begin_change_user(self, key: Arc<ConnectionKey>) -> Arc<SpecialOperation> {
        SpecialOperation::create_change_user(self, key)
    }

    pub(crate) fn internal(&self) -> &dyn InternalConnection {
        self.internal.as_ref()
    }

    pub(crate) fn internal_mut(&mut self) -> &mut dyn InternalConnection {
        self.internal.as_mut()
    }

    pub(crate) fn set_connection_options(&mut self, options: ConnectionOptions) {
        self.options = options;
    }

    pub(crate) fn set_kill_on_query_timeout(&mut self, kill: bool) {
        self.kill_on_query_timeout = kill;
    }

    pub(crate) fn set_context(&mut self, context: ConnectionContext) {
        self.context = context;
    }

    pub(crate) fn set_key(&mut self, key: Arc<ConnectionKey>) {
        self.key = key;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.internal.has_initialized() {
            return;
        }
        // Best-effort close-time reset. A reset that would block is
        // abandoned; the socket is closed either way.
        if self.options.is_reset_conn_before_close() || self.options.is_delayed_reset_conn() {
            let status = self.client.handler().reset_conn(self.internal.as_mut());
            if status != Status::Done {
                tracing::debug!(?status, "close-time reset did not finish; closing anyway");
            }
        }
        self.internal.close();
    }
}
