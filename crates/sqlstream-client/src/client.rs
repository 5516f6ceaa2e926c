//! The client: handler + event loop + logging sinks + client defaults.
//!
//! One client hosts many connections and operations. The asynchronous
//! and synchronous variants differ only in the event loop they are
//! built with; the operation state machines are shared.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use sqlstream_core::{ConnectionKey, Result};

use crate::connect::ConnectOperation;
use crate::connection::Connection;
use crate::event_loop::{EventLoop, InlineEventLoop, ThreadedEventLoop};
use crate::handler::MysqlHandler;
use crate::logging::{ClientStats, DbLogger, TracingLogger};
use crate::options::ConnectionOptions;

/// Default event-loop stall threshold for timeout attribution.
const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_millis(50);

struct ClientCore {
    handler: Arc<dyn MysqlHandler>,
    event_loop: Arc<dyn EventLoop>,
    logger: Mutex<Arc<dyn DbLogger>>,
    stats: ClientStats,
    active_connections: AtomicUsize,
    default_tcp_timeout_micros: AtomicU64,
    stall_threshold_micros: AtomicU64,
}

/// Handle to a MySQL client. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct MysqlClient {
    core: Arc<ClientCore>,
}

impl MysqlClient {
    /// Build a client over an explicit event loop.
    pub fn new(handler: Arc<dyn MysqlHandler>, event_loop: Arc<dyn EventLoop>) -> Self {
        Self {
            core: Arc::new(ClientCore {
                handler,
                event_loop,
                logger: Mutex::new(Arc::new(TracingLogger)),
                stats: ClientStats::default(),
                active_connections: AtomicUsize::new(0),
                default_tcp_timeout_micros: AtomicU64::new(0),
                stall_threshold_micros: AtomicU64::new(
                    DEFAULT_STALL_THRESHOLD.as_micros() as u64
                ),
            }),
        }
    }

    /// The asynchronous variant: operations run on a dedicated I/O
    /// thread and callers block in `wait()`.
    pub fn asynchronous(handler: Arc<dyn MysqlHandler>) -> Self {
        Self::new(handler, ThreadedEventLoop::spawn())
    }

    /// The synchronous variant: operations run inline on the calling
    /// thread against a blocking driver, and `wait()` is a no-op.
    pub fn synchronous(handler: Arc<dyn MysqlHandler>) -> Self {
        Self::new(handler, Arc::new(InlineEventLoop::new()))
    }

    pub fn handler(&self) -> Arc<dyn MysqlHandler> {
        Arc::clone(&self.core.handler)
    }

    pub fn event_loop(&self) -> Arc<dyn EventLoop> {
        Arc::clone(&self.core.event_loop)
    }

    pub fn logger(&self) -> Arc<dyn DbLogger> {
        Arc::clone(&self.core.logger.lock())
    }

    pub fn set_logger(&self, logger: Arc<dyn DbLogger>) {
        *self.core.logger.lock() = logger;
    }

    pub fn stats(&self) -> &ClientStats {
        &self.core.stats
    }

    /// Connections currently tracked by this client, reported in the
    /// overload part of timeout messages.
    pub fn active_connection_count(&self) -> usize {
        self.core.active_connections.load(Ordering::Relaxed)
    }

    pub(crate) fn active_connection_added(&self) {
        self.core.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn active_connection_removed(&self) {
        self.core.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// TCP-handshake timeout applied when the connection options do not
    /// set one. Zero disables the sub-timeout.
    pub fn default_tcp_timeout(&self) -> Duration {
        Duration::from_micros(self.core.default_tcp_timeout_micros.load(Ordering::Relaxed))
    }

    pub fn set_default_tcp_timeout(&self, timeout: Duration) {
        self.core
            .default_tcp_timeout_micros
            .store(timeout.as_micros() as u64, Ordering::Relaxed);
    }

    /// Callback-delay average at or above this is attributed as an
    /// event loop stall in timeout messages.
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_micros(self.core.stall_threshold_micros.load(Ordering::Relaxed))
    }

    pub fn set_stall_threshold(&self, threshold: Duration) {
        self.core
            .stall_threshold_micros
            .store(threshold.as_micros() as u64, Ordering::Relaxed);
    }

    /// Create a connect operation for `key`. Configure it with its
    /// setters, then `run()` it.
    pub fn begin_connection(&self, key: impl Into<Arc<ConnectionKey>>) -> Arc<ConnectOperation> {
        ConnectOperation::create(self, key.into())
    }

    /// Convenience: connect, wait, and hand back the established
    /// connection or the failure.
    pub fn connect(
        &self,
        key: impl Into<Arc<ConnectionKey>>,
        options: &ConnectionOptions,
    ) -> Result<Connection> {
        let op = self.begin_connection(key);
        op.set_connection_options(options)?;
        op.must_succeed()?;
        op.release_connection()
    }
}
