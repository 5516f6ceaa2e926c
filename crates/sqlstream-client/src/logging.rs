//! Logging sinks and client counters.
//!
//! Operations report connection and query outcomes through [`DbLogger`];
//! the default sink forwards to `tracing`. Aggregate counters live in
//! [`ClientStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sqlstream_core::{ConnectionKey, FailureReason, OperationType};

use crate::connection::ConnectionContext;

/// Facts every log entry carries.
#[derive(Debug, Clone)]
pub struct CommonLoggingData {
    pub op_type: OperationType,
    /// Wall time from run() to completion
    pub elapsed: Duration,
    /// The timeout armed when the operation completed
    pub timeout: Duration,
}

/// Sink for operation outcomes.
///
/// Implementations must tolerate being called from the I/O thread and
/// must not re-enter the operation that is logging.
pub trait DbLogger: Send + Sync {
    fn log_connection_success(
        &self,
        data: &CommonLoggingData,
        key: &ConnectionKey,
        context: &ConnectionContext,
    );

    fn log_connection_failure(
        &self,
        data: &CommonLoggingData,
        reason: FailureReason,
        key: &ConnectionKey,
        errno: u32,
        message: &str,
        context: &ConnectionContext,
    );

    fn log_query_success(&self, data: &CommonLoggingData, key: &ConnectionKey);

    fn log_query_failure(
        &self,
        data: &CommonLoggingData,
        reason: FailureReason,
        key: &ConnectionKey,
        errno: u32,
        message: &str,
    );
}

/// Default sink: structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl DbLogger for TracingLogger {
    fn log_connection_success(
        &self,
        data: &CommonLoggingData,
        key: &ConnectionKey,
        context: &ConnectionContext,
    ) {
        tracing::info!(
            endpoint = %key.endpoint(),
            user = key.user(),
            elapsed_ms = data.elapsed.as_millis() as u64,
            ssl = context.is_ssl_connection,
            "connection established"
        );
    }

    fn log_connection_failure(
        &self,
        data: &CommonLoggingData,
        reason: FailureReason,
        key: &ConnectionKey,
        errno: u32,
        message: &str,
        _context: &ConnectionContext,
    ) {
        tracing::warn!(
            endpoint = %key.endpoint(),
            user = key.user(),
            elapsed_ms = data.elapsed.as_millis() as u64,
            ?reason,
            errno,
            message,
            "connection attempt failed"
        );
    }

    fn log_query_success(&self, data: &CommonLoggingData, key: &ConnectionKey) {
        tracing::debug!(
            endpoint = %key.endpoint(),
            op = %data.op_type,
            elapsed_ms = data.elapsed.as_millis() as u64,
            "query completed"
        );
    }

    fn log_query_failure(
        &self,
        data: &CommonLoggingData,
        reason: FailureReason,
        key: &ConnectionKey,
        errno: u32,
        message: &str,
    ) {
        tracing::warn!(
            endpoint = %key.endpoint(),
            op = %data.op_type,
            elapsed_ms = data.elapsed.as_millis() as u64,
            ?reason,
            errno,
            message,
            "query failed"
        );
    }
}

/// Aggregate client counters.
#[derive(Debug, Default)]
pub struct ClientStats {
    opened_connections: AtomicU64,
    failed_connections: AtomicU64,
    succeeded_queries: AtomicU64,
    failed_queries: AtomicU64,
    reused_tls_sessions: AtomicU64,
}

impl ClientStats {
    pub(crate) fn incr_opened_connections(&self) {
        self.opened_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_failed_connections(&self) {
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_succeeded_queries(&self) {
        self.succeeded_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_failed_queries(&self) {
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_reused_tls_sessions(&self) {
        self.reused_tls_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn opened_connections(&self) -> u64 {
        self.opened_connections.load(Ordering::Relaxed)
    }

    pub fn failed_connections(&self) -> u64 {
        self.failed_connections.load(Ordering::Relaxed)
    }

    pub fn succeeded_queries(&self) -> u64 {
        self.succeeded_queries.load(Ordering::Relaxed)
    }

    pub fn failed_queries(&self) -> u64 {
        self.failed_queries.load(Ordering::Relaxed)
    }

    pub fn reused_tls_sessions(&self) -> u64 {
        self.reused_tls_sessions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_counters_accumulate() {
        let stats = ClientStats::default();
        stats.incr_opened_connections();
        stats.incr_opened_connections();
        stats.incr_failed_queries();
        stats.incr_reused_tls_sessions();

        assert_eq!(stats.opened_connections(), 2);
        assert_eq!(stats.failed_connections(), 0);
        assert_eq!(stats.failed_queries(), 1);
        assert_eq!(stats.reused_tls_sessions(), 1);
    }
}
