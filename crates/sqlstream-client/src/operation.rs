//! Operation lifecycle shared by connect, fetch, and special operations.
//!
//! Every operation is an explicit state machine ticked on the I/O thread
//! by `actionable()`-style entry points; there are no coroutines. The
//! generic [`Operation`] wrapper owns the per-kind core behind one mutex
//! and provides the cross-thread surface: `run`, `cancel`, `wait`,
//! `must_succeed`, result accessors, and connection release. Everything
//! that advances protocol state happens in the per-kind modules.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use sqlstream_core::state::mysql_errno;
use sqlstream_core::{
    ClientErrno, ConnectionKey, Error, OperationFailedError, OperationResult, OperationState,
    OperationType, Result,
};

use crate::client::MysqlClient;
use crate::connection::Connection;
use crate::event_loop::{EventLoop, FdWatchId, TimerId};
use crate::handler::IoInterest;

pub(crate) const ERROR_PREFIX: &str = "Mysql Client";

/// State every operation kind carries.
#[doc(hidden)]
pub struct BaseCore {
    pub(crate) state: OperationState,
    pub(crate) result: OperationResult,
    pub(crate) conn: Option<Connection>,
    pub(crate) mysql_errno: u32,
    pub(crate) mysql_error: String,
    /// The per-operation timeout currently armed (zero disables)
    pub(crate) timeout: Duration,
    pub(crate) started_at: Option<Instant>,
    pub(crate) ended_at: Option<Instant>,
    pub(crate) timer: Option<TimerId>,
    pub(crate) fd_watch: Option<FdWatchId>,
    pub(crate) cancel_requested: bool,
}

impl BaseCore {
    pub(crate) fn new(conn: Connection, timeout: Duration) -> Self {
        Self {
            state: OperationState::Unstarted,
            result: OperationResult::Unknown,
            conn: Some(conn),
            mysql_errno: 0,
            mysql_error: String::new(),
            timeout,
            started_at: None,
            ended_at: None,
            timer: None,
            fd_watch: None,
            cancel_requested: false,
        }
    }

    /// Wall time since run(); frozen once the operation completes.
    pub(crate) fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(start) => self.ended_at.unwrap_or_else(Instant::now) - start,
            None => Duration::ZERO,
        }
    }

    pub(crate) fn has_elapsed(&self, budget: Duration) -> bool {
        self.elapsed() > budget
    }

    /// Capture the driver's errno/message before any cleanup can
    /// overwrite them.
    pub(crate) fn snapshot_conn_error(&mut self) {
        if let Some(conn) = &self.conn {
            self.mysql_errno = conn.internal().errno();
            self.mysql_error = conn.internal().error_message();
        }
    }

    pub(crate) fn set_client_error(&mut self, errno: u32, message: impl Into<String>) {
        self.mysql_errno = errno;
        self.mysql_error = message.into();
    }
}

pub(crate) struct OpShared {
    pub(crate) client: MysqlClient,
    pub(crate) completed_cv: Condvar,
}

/// Dispatch points each operation kind implements. The methods are
/// always entered from posted loop tasks (or inline under the inline
/// loop); they lock the core themselves.
#[doc(hidden)]
pub trait OperationCore: Send + 'static {
    fn base(&mut self) -> &mut BaseCore;
    fn base_ref(&self) -> &BaseCore;
    fn op_type(&self) -> OperationType;

    /// First tick after run() reached the I/O thread.
    fn run_started(op: &Arc<Operation<Self>>)
    where
        Self: Sized;

    /// Watched socket readiness arrived.
    fn io_ready(op: &Arc<Operation<Self>>)
    where
        Self: Sized;

    /// The per-operation timeout fired.
    fn timeout_fired(op: &Arc<Operation<Self>>)
    where
        Self: Sized;

    /// A cancel request reached the I/O thread.
    fn resolve_cancel(op: &Arc<Operation<Self>>)
    where
        Self: Sized;

    /// Complete immediately with `result` (loop-rejection path; may run
    /// off the I/O thread).
    fn complete_now(op: &Arc<Operation<Self>>, result: OperationResult)
    where
        Self: Sized;
}

/// An in-flight request against a [`Connection`]; one state machine
/// instance. Shared as `Arc`; all methods are safe from any thread.
pub struct Operation<C: OperationCore> {
    pub(crate) shared: OpShared,
    pub(crate) core: Mutex<C>,
}

impl<C: OperationCore> Operation<C> {
    pub(crate) fn new(client: MysqlClient, core: C) -> Arc<Self> {
        Arc::new(Self {
            shared: OpShared {
                client,
                completed_cv: Condvar::new(),
            },
            core: Mutex::new(core),
        })
    }

    pub(crate) fn event_loop(&self) -> Arc<dyn EventLoop> {
        self.shared.client.event_loop()
    }

    pub fn client(&self) -> &MysqlClient {
        &self.shared.client
    }

    pub fn state(&self) -> OperationState {
        self.core.lock().base_ref().state
    }

    /// Valid only once the operation is `Completed`; `Unknown` before.
    pub fn result(&self) -> OperationResult {
        self.core.lock().base_ref().result
    }

    /// True when the operation completed successfully.
    pub fn ok(&self) -> bool {
        self.result() == OperationResult::Succeeded
    }

    /// Snapshotted driver errno (0 when none was produced).
    pub fn mysql_errno(&self) -> u32 {
        self.core.lock().base_ref().mysql_errno
    }

    /// Snapshotted driver error message.
    pub fn mysql_error(&self) -> String {
        self.core.lock().base_ref().mysql_error.clone()
    }

    /// Wall time since run(); frozen at completion.
    pub fn elapsed(&self) -> Duration {
        self.core.lock().base_ref().elapsed()
    }

    pub fn op_type(&self) -> OperationType {
        self.core.lock().op_type()
    }

    /// Move to `Pending`, arm the per-operation timeout, and post the
    /// first tick onto the I/O thread. Returns the operation for
    /// chaining; a second call is refused with `InvalidState`.
    pub fn run(self: &Arc<Self>) -> Result<Arc<Self>> {
        {
            let mut core = self.core.lock();
            let state = core.base_ref().state;
            if state != OperationState::Unstarted {
                return Err(Error::invalid_state("run", state));
            }
            let base = core.base();
            base.state = OperationState::Pending;
            base.started_at = Some(Instant::now());
            let timeout = base.timeout;
            arm_operation_timer(self, base, timeout);
        }

        let task_op = Arc::clone(self);
        let accepted = self.event_loop().run_in_loop(Box::new(move || {
            let cancelled = task_op.core.lock().base_ref().cancel_requested;
            if cancelled {
                C::complete_now(&task_op, OperationResult::Cancelled);
            } else {
                C::run_started(&task_op);
            }
        }));
        if !accepted {
            self.core.lock().base().set_client_error(
                0,
                "the event loop rejected the operation (shutting down)",
            );
            C::complete_now(self, OperationResult::Failed);
        }
        Ok(Arc::clone(self))
    }

    /// Request cancellation. Returns immediately; the operation
    /// completes `Cancelled` once the I/O thread observes the request.
    /// Safe from any thread, including notification callbacks' threads.
    pub fn cancel(self: &Arc<Self>) {
        let post = {
            let mut core = self.core.lock();
            let base = core.base();
            match base.state {
                OperationState::Unstarted => {
                    // run() will observe the flag and complete Cancelled.
                    base.cancel_requested = true;
                    false
                }
                OperationState::Pending => {
                    base.cancel_requested = true;
                    base.state = OperationState::Cancelling;
                    true
                }
                OperationState::Cancelling | OperationState::Completed => false,
            }
        };

        if post {
            let task_op = Arc::clone(self);
            let accepted = self
                .event_loop()
                .run_in_loop(Box::new(move || C::resolve_cancel(&task_op)));
            if !accepted {
                C::complete_now(self, OperationResult::Cancelled);
            }
        }
    }

    /// Block the calling thread until the operation completes. Under the
    /// inline loop the operation has already completed, so this returns
    /// immediately.
    pub fn wait(&self) {
        let mut core = self.core.lock();
        while core.base_ref().state != OperationState::Completed {
            debug_assert!(
                !self.event_loop().is_in_loop_thread(),
                "wait() would deadlock the I/O thread"
            );
            self.shared.completed_cv.wait(&mut core);
        }
    }

    /// Run (if not yet run), wait, and fail unless the result is
    /// `Succeeded`.
    pub fn must_succeed(self: &Arc<Self>) -> Result<()> {
        if self.state() == OperationState::Unstarted {
            self.run()?;
        }
        self.wait();
        let core = self.core.lock();
        let base = core.base_ref();
        if base.result == OperationResult::Succeeded {
            Ok(())
        } else {
            Err(Error::OperationFailed(OperationFailedError {
                op_type: core.op_type(),
                result: base.result,
                errno: base.mysql_errno,
                message: base.mysql_error.clone(),
            }))
        }
    }

    /// Take the connection back after completion.
    pub fn release_connection(&self) -> Result<Connection> {
        let mut core = self.core.lock();
        let state = core.base_ref().state;
        if state != OperationState::Completed {
            return Err(Error::invalid_state("release_connection", state));
        }
        core.base()
            .conn
            .take()
            .ok_or_else(|| Error::Custom("connection already released".to_string()))
    }
}

/// Park the operation on socket readiness for `interest`.
pub(crate) fn wait_for_actionable<C: OperationCore>(
    op: &Arc<Operation<C>>,
    base: &mut BaseCore,
    interest: IoInterest,
) {
    let fd = base
        .conn
        .as_ref()
        .map(|c| c.internal().socket_descriptor())
        .unwrap_or(-1);
    let task_op = Arc::clone(op);
    let id = op
        .event_loop()
        .watch_fd(fd, interest, Box::new(move || C::io_ready(&task_op)));
    base.fd_watch = Some(id);
}

/// (Re)arm the per-operation timeout. Zero disarms without rearming.
pub(crate) fn arm_operation_timer<C: OperationCore>(
    op: &Arc<Operation<C>>,
    base: &mut BaseCore,
    delay: Duration,
) {
    if let Some(id) = base.timer.take() {
        op.event_loop().cancel_timeout(id);
    }
    if delay.is_zero() {
        return;
    }
    let task_op = Arc::clone(op);
    let id = op
        .event_loop()
        .schedule_timeout(delay, Box::new(move || C::timeout_fired(&task_op)));
    base.timer = Some(id);
}

/// Drop the fd watch and any armed per-operation timer.
pub(crate) fn clear_registrations(event_loop: &dyn EventLoop, base: &mut BaseCore) {
    if let Some(id) = base.timer.take() {
        event_loop.cancel_timeout(id);
    }
    if let Some(id) = base.fd_watch.take() {
        event_loop.unwatch_fd(id);
    }
}

/// Enter `Completed`, applying cancel-wins resolution. Registrations
/// must already be cleared. Returns the final result.
pub(crate) fn finish_completion(base: &mut BaseCore, result: OperationResult) -> OperationResult {
    debug_assert!(base.timer.is_none() && base.fd_watch.is_none());
    let result = if base.cancel_requested && result != OperationResult::Succeeded {
        OperationResult::Cancelled
    } else {
        result
    };
    debug_assert!(base.state.can_transition_to(OperationState::Completed));
    base.state = OperationState::Completed;
    base.result = result;
    base.ended_at = Some(Instant::now());
    result
}

/// Build the standardized connect-timeout error: snapshot errno plus the
/// message carrying stage, durations, stall attribution, and the
/// `TcpTimeout` tag.
pub(crate) fn connect_timeout_error(
    client: &MysqlClient,
    key: &ConnectionKey,
    stage: &str,
    elapsed: Duration,
    timeout: Duration,
    is_tcp_timeout: bool,
) -> (u32, String) {
    let cb_delay_us = client.event_loop().callback_delay_micros_avg();
    let stalled = cb_delay_us >= client.stall_threshold().as_micros() as u64;
    let code = if stalled {
        ClientErrno::ConnTimeoutLoopStalled
    } else {
        ClientErrno::ConnTimeout
    };

    let mut parts = vec![format!(
        "[{}]({}) Connect to {}:{} timed out",
        code.code(),
        ERROR_PREFIX,
        key.host(),
        key.port()
    )];
    parts.push(format!("at stage {}", stage));
    parts.push(format!(
        "(took {}ms, timeout was {}ms)",
        elapsed.as_millis(),
        timeout.as_millis()
    ));
    if stalled {
        parts.push(format!(
            "(CLIENT_OVERLOADED: cb delay {}ms, {} active conns)",
            cb_delay_us / 1000,
            client.active_connection_count()
        ));
    }
    parts.push(format!("(TcpTimeout:{})", u8::from(is_tcp_timeout)));

    (mysql_errno::CR_SERVER_LOST, parts.join(" "))
}

/// Timeout error for non-connect operations (query, reset, change-user).
pub(crate) fn operation_timeout_error(
    client: &MysqlClient,
    what: &str,
    elapsed: Duration,
    timeout: Duration,
) -> (u32, String) {
    let cb_delay_us = client.event_loop().callback_delay_micros_avg();
    let stalled = cb_delay_us >= client.stall_threshold().as_micros() as u64;
    let code = if stalled {
        ClientErrno::ConnTimeoutLoopStalled
    } else {
        ClientErrno::ConnTimeout
    };

    let mut parts = vec![format!("[{}]({}) {} timed out", code.code(), ERROR_PREFIX, what)];
    parts.push(format!(
        "(took {}ms, timeout was {}ms)",
        elapsed.as_millis(),
        timeout.as_millis()
    ));
    if stalled {
        parts.push(format!(
            "(CLIENT_OVERLOADED: cb delay {}ms, {} active conns)",
            cb_delay_us / 1000,
            client.active_connection_count()
        ));
    }

    (mysql_errno::CR_SERVER_LOST, parts.join(" "))
}
