//! Streaming fetch operation: one or more statements issued as a single
//! multi-query, with rows streamed through [`RowStream`].
//!
//! The operation is an explicit state machine over [`FetchAction`].
//! Notifications are delivered on the I/O thread through
//! [`FetchCallbacks`]; from inside a notification the consumer may call
//! [`FetchContext::pause_for_consumer`], which parks the machine so
//! another thread can read stream state until [`FetchOperation::resume`]
//! is called. Pausing is the only time non-I/O-thread access to stream
//! state is permitted before completion.

use std::sync::Arc;
use std::time::Duration;

use sqlstream_core::{
    ConnectionKey, EphemeralRow, Error, FailureReason, OperationResult, OperationState,
    OperationType, Result, RowFields,
};

use crate::connection::Connection;
use crate::handler::{FetchRowStatus, InternalConnection, InternalResult, IoInterest,
    MysqlHandler, NextResultStatus, Status};
use crate::logging::CommonLoggingData;
use crate::operation::{
    arm_operation_timer, clear_registrations, finish_completion, operation_timeout_error,
    wait_for_actionable, BaseCore, Operation, OperationCore,
};

/// One or more SQL statements issued as a single multi-query.
///
/// Query composition and escaping happen upstream; statements arrive
/// here as rendered SQL text.
#[derive(Debug, Clone)]
pub struct MultiQuery {
    statements: Vec<String>,
}

impl MultiQuery {
    pub fn new(statements: Vec<String>) -> Self {
        Self { statements }
    }

    pub fn single(statement: impl Into<String>) -> Self {
        Self {
            statements: vec![statement.into()],
        }
    }

    pub fn num_statements(&self) -> usize {
        self.statements.len()
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// The text sent to the server: statements joined with `;`.
    pub fn rendered(&self) -> String {
        self.statements.join(";")
    }
}

/// What the fetch machine will do on its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchAction {
    /// Send the query, or advance to the next result set
    StartQuery,
    /// Read result metadata and build the row stream
    InitFetch,
    /// Fetch rows
    Fetch,
    /// Parked for a consumer; resumes into `paused_action`
    WaitForConsumer,
    /// Close out the current statement
    CompleteQuery,
    /// Terminal bookkeeping
    CompleteOperation,
}

/// Streaming access to one result set.
///
/// Holds at most one prefetched row. The stream lives as long as its
/// owning fetch operation and is moved, never copied.
pub struct RowStream {
    result: Box<dyn InternalResult>,
    fields: Arc<RowFields>,
    current_row: Option<EphemeralRow>,
    query_finished: bool,
    num_rows_seen: u64,
    query_result_size: u64,
    size_accounted: bool,
}

enum SlurpStatus {
    /// A row was prefetched or the end of the set was reached
    Progress,
    Pending(IoInterest),
    Error,
}

impl RowStream {
    fn new(result: Box<dyn InternalResult>) -> Self {
        let fields = result.row_fields();
        Self {
            result,
            fields,
            current_row: None,
            query_finished: false,
            num_rows_seen: 0,
            query_result_size: 0,
            size_accounted: false,
        }
    }

    /// True when a prefetched row is ready to consume.
    pub fn has_next(&self) -> bool {
        self.current_row.is_some()
    }

    /// Move the prefetched row out, invalidating the prior one.
    pub fn consume_row(&mut self) -> Option<EphemeralRow> {
        self.current_row.take()
    }

    pub fn row_fields(&self) -> &Arc<RowFields> {
        &self.fields
    }

    /// True once the server reported the end of this result set.
    pub fn query_finished(&self) -> bool {
        self.query_finished
    }

    pub fn num_rows_seen(&self) -> u64 {
        self.num_rows_seen
    }

    /// Best-effort count of row payload bytes seen so far, excluding
    /// metadata and packet overhead.
    pub fn query_result_size(&self) -> u64 {
        self.query_result_size
    }

    fn slurp(
        &mut self,
        handler: &dyn MysqlHandler,
        conn: &mut dyn InternalConnection,
    ) -> SlurpStatus {
        match handler.fetch_row(conn, self.result.as_mut()) {
            FetchRowStatus::Row(row) => {
                self.num_rows_seen += 1;
                self.query_result_size += row.byte_size();
                self.current_row = Some(row);
                SlurpStatus::Progress
            }
            FetchRowStatus::End => {
                self.query_finished = true;
                SlurpStatus::Progress
            }
            FetchRowStatus::Pending(interest) => SlurpStatus::Pending(interest),
            FetchRowStatus::Error => SlurpStatus::Error,
        }
    }

    fn take_unaccounted_size(&mut self) -> u64 {
        if self.size_accounted {
            0
        } else {
            self.size_accounted = true;
            self.query_result_size
        }
    }
}

/// Notifications delivered on the I/O thread as the fetch progresses.
///
/// For each statement the order is `on_init_query`, zero or more
/// `on_rows_ready`, then exactly one of `on_query_success` or
/// `on_failure`; `on_operation_completed` is final and fires exactly
/// once. Any method may call [`FetchContext::pause_for_consumer`].
pub trait FetchCallbacks: Send {
    fn on_init_query(&mut self, _op: &mut FetchContext<'_>) {}
    fn on_rows_ready(&mut self, _op: &mut FetchContext<'_>) {}
    fn on_query_success(&mut self, _op: &mut FetchContext<'_>, _has_more_results: bool) {}
    fn on_failure(&mut self, _op: &mut FetchContext<'_>, _result: OperationResult) {}
    fn on_operation_completed(&mut self, _op: &mut FetchContext<'_>, _result: OperationResult) {}
}

/// Handle a notification callback uses to interact with the operation
/// without re-entering it.
pub struct FetchContext<'a> {
    core: &'a mut FetchCore,
    handler: &'a dyn MysqlHandler,
}

impl FetchContext<'_> {
    /// Park the fetch machine so another thread may read stream state.
    /// The saved action is restored by [`FetchOperation::resume`].
    pub fn pause_for_consumer(&mut self) {
        if self.core.active_fetch_action != FetchAction::WaitForConsumer {
            self.core.paused_action = self.core.active_fetch_action;
            self.core.active_fetch_action = FetchAction::WaitForConsumer;
        }
    }

    /// Cancel the operation from inside a notification.
    pub fn cancel(&mut self) {
        fetch_cancel_locked(self.core, self.handler);
    }

    pub fn row_stream(&mut self) -> Option<&mut RowStream> {
        self.core.row_stream.as_mut()
    }

    /// 1-based index of the statement currently being processed.
    pub fn num_current_query(&self) -> u32 {
        self.core.num_current_query
    }

    pub fn current_affected_rows(&self) -> u64 {
        self.core.current_affected_rows
    }

    pub fn current_last_insert_id(&self) -> u64 {
        self.core.current_last_insert_id
    }

    pub fn current_recv_gtid(&self) -> Option<&str> {
        self.core.current_recv_gtid.as_deref()
    }

    pub fn current_resp_attrs(&self) -> &[(String, String)] {
        &self.core.current_resp_attrs
    }

    pub fn no_index_used(&self) -> bool {
        self.core.no_index_used
    }
}

/// A streaming multi-query; see [`Connection::begin_multi_query`].
pub type FetchOperation = Operation<FetchCore>;

/// Fetch-specific operation state.
pub struct FetchCore {
    pub(crate) base: BaseCore,
    op_type: OperationType,
    key: Arc<ConnectionKey>,
    rendered_query: String,
    num_statements: usize,
    callbacks: Option<Box<dyn FetchCallbacks>>,
    row_stream: Option<RowStream>,
    query_executed: bool,
    cancel: bool,
    /// A failure routed through CompleteQuery so on_failure fires first
    pending_result: Option<OperationResult>,
    terminal_result: OperationResult,
    num_queries_executed: u32,
    num_current_query: u32,
    total_result_size: u64,
    rows_received: u64,
    no_index_used: bool,
    kill_dispatched: bool,
    discard_warned: bool,
    kill_on_query_timeout: bool,
    current_affected_rows: u64,
    current_last_insert_id: u64,
    current_recv_gtid: Option<String>,
    current_resp_attrs: Vec<(String, String)>,
    active_fetch_action: FetchAction,
    paused_action: FetchAction,
}

impl OperationCore for FetchCore {
    fn base(&mut self) -> &mut BaseCore {
        &mut self.base
    }

    fn base_ref(&self) -> &BaseCore {
        &self.base
    }

    fn op_type(&self) -> OperationType {
        self.op_type
    }

    fn run_started(op: &Arc<FetchOperation>) {
        let mut core = op.core.lock();
        if core.base.state != OperationState::Completed {
            tick_machine(op, &mut core);
        }
    }

    fn io_ready(op: &Arc<FetchOperation>) {
        let mut core = op.core.lock();
        if core.base.state != OperationState::Completed {
            core.base.fd_watch = None;
            tick_machine(op, &mut core);
        }
    }

    fn timeout_fired(op: &Arc<FetchOperation>) {
        let mut core = op.core.lock();
        if core.base.state == OperationState::Completed {
            return;
        }
        core.base.timer = None;

        if core.kill_on_query_timeout {
            dispatch_kill(&mut core, op.client().handler().as_ref());
        }
        let (errno, message) = operation_timeout_error(
            op.client(),
            "Query",
            core.base.elapsed(),
            core.base.timeout,
        );
        core.base.set_client_error(errno, message);
        core.pending_result = Some(OperationResult::TimedOut);
        if let Some(id) = core.base.fd_watch.take() {
            op.event_loop().unwatch_fd(id);
        }
        core.active_fetch_action = FetchAction::CompleteQuery;
        tick_machine(op, &mut core);
    }

    fn resolve_cancel(op: &Arc<FetchOperation>) {
        let mut core = op.core.lock();
        if core.base.state == OperationState::Completed {
            return;
        }
        let handler = op.client().handler();
        fetch_cancel_locked(&mut core, handler.as_ref());
        if let Some(id) = core.base.fd_watch.take() {
            op.event_loop().unwatch_fd(id);
        }
        tick_machine(op, &mut core);
    }

    fn complete_now(op: &Arc<FetchOperation>, result: OperationResult) {
        let mut core = op.core.lock();
        if core.base.state == OperationState::Completed {
            return;
        }
        core.terminal_result = result;
        complete_operation(op, &mut core);
    }
}

impl FetchOperation {
    pub(crate) fn create(
        conn: Connection,
        queries: MultiQuery,
        callbacks: Box<dyn FetchCallbacks>,
    ) -> Arc<FetchOperation> {
        let client = conn.client().clone();
        let key = Arc::clone(conn.key());
        let timeout = conn.options().get_query_timeout();
        let kill_on_query_timeout = conn.kill_on_query_timeout();
        let op_type = if queries.num_statements() > 1 {
            OperationType::MultiQuery
        } else {
            OperationType::Query
        };
        let rendered_query = queries.rendered();
        let num_statements = queries.num_statements();
        Operation::new(
            client,
            FetchCore {
                base: BaseCore::new(conn, timeout),
                op_type,
                key,
                rendered_query,
                num_statements,
                callbacks: Some(callbacks),
                row_stream: None,
                query_executed: false,
                cancel: false,
                pending_result: None,
                terminal_result: OperationResult::Unknown,
                num_queries_executed: 0,
                num_current_query: 0,
                total_result_size: 0,
                rows_received: 0,
                no_index_used: false,
                kill_dispatched: false,
                discard_warned: false,
                kill_on_query_timeout,
                current_affected_rows: 0,
                current_last_insert_id: 0,
                current_recv_gtid: None,
                current_resp_attrs: Vec::new(),
                active_fetch_action: FetchAction::StartQuery,
                paused_action: FetchAction::StartQuery,
            },
        )
    }

    /// The SQL text sent to the server.
    pub fn rendered_query(&self) -> String {
        self.core.lock().rendered_query.clone()
    }

    pub fn num_statements(&self) -> usize {
        self.core.lock().num_statements
    }

    /// Number of statements that succeeded. Illegal while `Pending`.
    pub fn num_queries_executed(&self) -> Result<u32> {
        let core = self.core.lock();
        if core.base.state == OperationState::Pending {
            return Err(Error::invalid_state("num_queries_executed", core.base.state));
        }
        Ok(core.num_queries_executed)
    }

    /// Accumulated result payload bytes. Illegal while `Unstarted`.
    pub fn result_size(&self) -> Result<u64> {
        let core = self.core.lock();
        if core.base.state == OperationState::Unstarted {
            return Err(Error::invalid_state("result_size", core.base.state));
        }
        Ok(core.total_result_size)
    }

    /// 1-based index of the statement currently being processed.
    pub fn num_current_query(&self) -> u32 {
        self.core.lock().num_current_query
    }

    /// Rows delivered to rows-ready notifications so far.
    pub fn rows_received(&self) -> u64 {
        self.core.lock().rows_received
    }

    pub fn no_index_used(&self) -> bool {
        self.core.lock().no_index_used
    }

    /// Adjust the operation timeout. Rearms relative to run() when the
    /// operation is already in flight.
    pub fn set_timeout(self: &Arc<Self>, timeout: Duration) {
        let mut core = self.core.lock();
        core.base.timeout = timeout;
        if matches!(
            core.base.state,
            OperationState::Pending | OperationState::Cancelling
        ) {
            let remaining = timeout
                .saturating_sub(core.base.elapsed())
                .max(Duration::from_millis(1));
            arm_operation_timer(self, &mut core.base, remaining);
        }
    }

    /// True while the machine is parked in `WaitForConsumer`.
    pub fn is_paused(&self) -> bool {
        self.core.lock().active_fetch_action == FetchAction::WaitForConsumer
    }

    /// Whether the calling thread may touch stream state right now:
    /// on the I/O thread, while paused, or after completion.
    pub fn is_stream_access_allowed(&self) -> bool {
        if self.event_loop().is_in_loop_thread() {
            return true;
        }
        let core = self.core.lock();
        core.base.state == OperationState::Completed
            || core.active_fetch_action == FetchAction::WaitForConsumer
    }

    /// Access the row stream of the current statement. Fails with
    /// `InvalidState` when stream access is not currently allowed.
    pub fn with_row_stream<R>(&self, f: impl FnOnce(Option<&mut RowStream>) -> R) -> Result<R> {
        if !self.is_stream_access_allowed() {
            return Err(Error::invalid_state("with_row_stream", self.state()));
        }
        let mut core = self.core.lock();
        Ok(f(core.row_stream.as_mut()))
    }

    /// Affected-row count of the current statement. Guarded by stream
    /// access.
    pub fn current_affected_rows(&self) -> Result<u64> {
        self.stream_guarded("current_affected_rows", |core| core.current_affected_rows)
    }

    /// Last insert id of the current statement. Guarded by stream
    /// access.
    pub fn current_last_insert_id(&self) -> Result<u64> {
        self.stream_guarded("current_last_insert_id", |core| {
            core.current_last_insert_id
        })
    }

    /// GTID received for the current statement. Guarded by stream
    /// access.
    pub fn current_recv_gtid(&self) -> Result<Option<String>> {
        self.stream_guarded("current_recv_gtid", |core| core.current_recv_gtid.clone())
    }

    /// Response attributes of the current statement. Guarded by stream
    /// access.
    pub fn current_resp_attrs(&self) -> Result<Vec<(String, String)>> {
        self.stream_guarded("current_resp_attrs", |core| core.current_resp_attrs.clone())
    }

    /// Restore the paused action and re-enter the machine on the I/O
    /// thread. Legal only after a pause.
    pub fn resume(self: &Arc<Self>) {
        let task_op = Arc::clone(self);
        let accepted = self.event_loop().run_in_loop(Box::new(move || {
            let mut core = task_op.core.lock();
            if core.base.state == OperationState::Completed {
                return;
            }
            if core.active_fetch_action == FetchAction::WaitForConsumer {
                core.active_fetch_action = core.paused_action;
                tick_machine(&task_op, &mut core);
            } else {
                tracing::warn!("resume() called on a fetch that is not paused");
            }
        }));
        if !accepted {
            FetchCore::complete_now(self, OperationResult::Failed);
        }
    }

    fn stream_guarded<R>(
        &self,
        what: &'static str,
        f: impl FnOnce(&FetchCore) -> R,
    ) -> Result<R> {
        if !self.is_stream_access_allowed() {
            return Err(Error::invalid_state(what, self.state()));
        }
        let core = self.core.lock();
        Ok(f(&core))
    }
}

/// Mark the fetch cancelled: no further handler verbs are issued, a
/// best-effort kill is dispatched for an in-flight statement, and the
/// machine is routed to CompleteQuery.
fn fetch_cancel_locked(core: &mut FetchCore, handler: &dyn MysqlHandler) {
    core.cancel = true;
    core.base.cancel_requested = true;
    if core.query_executed && core.active_fetch_action != FetchAction::CompleteOperation {
        dispatch_kill(core, handler);
    }
    if core.active_fetch_action != FetchAction::CompleteOperation {
        core.active_fetch_action = FetchAction::CompleteQuery;
    }
}

fn dispatch_kill(core: &mut FetchCore, handler: &dyn MysqlHandler) {
    if core.kill_dispatched {
        return;
    }
    if let Some(conn) = core.base.conn.as_ref() {
        if handler.kill_running_query(conn.internal()) {
            core.kill_dispatched = true;
            tracing::debug!("dispatched best-effort kill for a cancelled query");
        }
    }
}

/// Drive the fetch machine until it parks (socket wait, pause) or
/// completes.
fn tick_machine(op: &Arc<FetchOperation>, core: &mut FetchCore) {
    let handler = op.client().handler();
    loop {
        match core.active_fetch_action {
            FetchAction::StartQuery => {
                let status = {
                    let FetchCore {
                        base,
                        rendered_query,
                        query_executed,
                        ..
                    } = &mut *core;
                    let conn = base.conn.as_mut().expect("operation owns its connection");
                    if *query_executed {
                        match handler.next_result(conn.internal_mut()) {
                            NextResultStatus::Done | NextResultStatus::MoreResults => Status::Done,
                            NextResultStatus::Pending(interest) => Status::Pending(interest),
                            NextResultStatus::Error => Status::Error,
                        }
                    } else {
                        handler.run_query(conn.internal_mut(), rendered_query)
                    }
                };
                match status {
                    Status::Pending(interest) => {
                        wait_for_actionable(op, &mut core.base, interest);
                        return;
                    }
                    Status::Error => {
                        core.base.snapshot_conn_error();
                        core.num_current_query += 1;
                        core.query_executed = true;
                        core.pending_result = Some(OperationResult::Failed);
                        core.active_fetch_action = FetchAction::CompleteQuery;
                    }
                    Status::Done => {
                        core.num_current_query += 1;
                        core.query_executed = true;
                        core.active_fetch_action = FetchAction::InitFetch;
                    }
                }
            }

            FetchAction::InitFetch => {
                let field_count = {
                    let conn = core.base.conn.as_ref().expect("operation owns its connection");
                    handler.get_field_count(conn.internal())
                };
                if field_count > 0 {
                    let result = {
                        let conn = core.base.conn.as_mut().expect("operation owns its connection");
                        handler.get_result(conn.internal_mut())
                    };
                    match result {
                        Some(result) => core.row_stream = Some(RowStream::new(result)),
                        None => {
                            core.base.snapshot_conn_error();
                            core.pending_result = Some(OperationResult::Failed);
                            core.active_fetch_action = FetchAction::CompleteQuery;
                            continue;
                        }
                    }
                } else {
                    core.row_stream = None;
                }

                // The next action is fixed before notifying so a pause
                // inside the notification resumes into the right place.
                core.active_fetch_action = if core.row_stream.is_some() {
                    FetchAction::Fetch
                } else {
                    FetchAction::CompleteQuery
                };
                notify(op, core, Notification::InitQuery);
                if core.active_fetch_action == FetchAction::WaitForConsumer {
                    return;
                }
            }

            FetchAction::Fetch => {
                let slurped = {
                    let FetchCore {
                        base,
                        row_stream,
                        discard_warned,
                        ..
                    } = &mut *core;
                    let stream = row_stream.as_mut().expect("Fetch requires a row stream");
                    let conn = base.conn.as_mut().expect("operation owns its connection");

                    if stream.has_next() {
                        // The consumer neither consumed nor paused.
                        if !*discard_warned {
                            *discard_warned = true;
                            tracing::warn!(
                                "rows are being discarded; consume the row stream from \
                                 the rows-ready notification or pause the fetch"
                            );
                        }
                        stream.consume_row();
                    }
                    stream.slurp(handler.as_ref(), conn.internal_mut())
                };
                match slurped {
                    SlurpStatus::Pending(interest) => {
                        wait_for_actionable(op, &mut core.base, interest);
                        return;
                    }
                    SlurpStatus::Error => {
                        core.base.snapshot_conn_error();
                        core.pending_result = Some(OperationResult::Failed);
                        core.active_fetch_action = FetchAction::CompleteQuery;
                    }
                    SlurpStatus::Progress => {
                        let stream = core.row_stream.as_ref().expect("stream still present");
                        if stream.has_next() {
                            core.rows_received += 1;
                            notify(op, core, Notification::RowsReady);
                            if core.active_fetch_action == FetchAction::WaitForConsumer {
                                return;
                            }
                        } else if stream.query_finished() {
                            core.active_fetch_action = FetchAction::CompleteQuery;
                        }
                    }
                }
            }

            FetchAction::CompleteQuery => {
                {
                    let conn = core.base.conn.as_ref().expect("operation owns its connection");
                    core.current_affected_rows = conn.internal().affected_rows();
                    core.current_last_insert_id = conn.internal().last_insert_id();
                    core.current_recv_gtid = conn.internal().recv_gtid();
                    core.current_resp_attrs = conn.internal().response_attributes();
                    core.no_index_used |= conn.internal().no_index_used();
                }
                if let Some(stream) = core.row_stream.as_mut() {
                    core.total_result_size += stream.take_unaccounted_size();
                }

                let failure = core.pending_result.take();
                if core.cancel {
                    core.terminal_result = OperationResult::Cancelled;
                    core.active_fetch_action = FetchAction::CompleteOperation;
                    notify(op, core, Notification::Failure(OperationResult::Cancelled));
                } else if let Some(result) = failure {
                    core.terminal_result = result;
                    core.active_fetch_action = FetchAction::CompleteOperation;
                    notify(op, core, Notification::Failure(result));
                } else {
                    core.num_queries_executed += 1;
                    let more_results = {
                        let conn = core.base.conn.as_ref().expect("operation owns its connection");
                        conn.internal().more_results_exist()
                    };
                    core.active_fetch_action = if more_results {
                        FetchAction::StartQuery
                    } else {
                        core.terminal_result = OperationResult::Succeeded;
                        FetchAction::CompleteOperation
                    };
                    notify(op, core, Notification::QuerySuccess(more_results));
                    if core.active_fetch_action == FetchAction::WaitForConsumer {
                        return;
                    }
                }
            }

            FetchAction::CompleteOperation => {
                complete_operation(op, core);
                return;
            }

            FetchAction::WaitForConsumer => return,
        }
    }
}

enum Notification {
    InitQuery,
    RowsReady,
    QuerySuccess(bool),
    Failure(OperationResult),
    OperationCompleted(OperationResult),
}

fn notify(op: &Arc<FetchOperation>, core: &mut FetchCore, notification: Notification) {
    let Some(mut callbacks) = core.callbacks.take() else {
        return;
    };
    let handler = op.client().handler();
    {
        let mut ctx = FetchContext {
            core,
            handler: handler.as_ref(),
        };
        match notification {
            Notification::InitQuery => callbacks.on_init_query(&mut ctx),
            Notification::RowsReady => callbacks.on_rows_ready(&mut ctx),
            Notification::QuerySuccess(more) => callbacks.on_query_success(&mut ctx, more),
            Notification::Failure(result) => callbacks.on_failure(&mut ctx, result),
            Notification::OperationCompleted(result) => {
                callbacks.on_operation_completed(&mut ctx, result)
            }
        }
    }
    core.callbacks = Some(callbacks);
}

fn complete_operation(op: &Arc<FetchOperation>, core: &mut FetchCore) {
    clear_registrations(&*op.event_loop(), &mut core.base);
    let result = finish_completion(&mut core.base, core.terminal_result);

    let data = CommonLoggingData {
        op_type: core.op_type,
        elapsed: core.base.elapsed(),
        timeout: core.base.timeout,
    };
    if result == OperationResult::Succeeded {
        op.client().stats().incr_succeeded_queries();
        op.client().logger().log_query_success(&data, &core.key);
    } else {
        op.client().stats().incr_failed_queries();
        op.client().logger().log_query_failure(
            &data,
            FailureReason::from_result(result),
            &core.key,
            core.base.mysql_errno,
            &core.base.mysql_error,
        );
    }

    notify(op, core, Notification::OperationCompleted(result));
    op.shared.completed_cv.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_query_rendering() {
        let queries = MultiQuery::new(vec!["SELECT 1".to_string(), "SELECT 2".to_string()]);
        assert_eq!(queries.num_statements(), 2);
        assert_eq!(queries.rendered(), "SELECT 1;SELECT 2");

        let single = MultiQuery::single("SELECT 42");
        assert_eq!(single.num_statements(), 1);
        assert_eq!(single.rendered(), "SELECT 42");
    }
}
