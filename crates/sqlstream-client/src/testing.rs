//! Deterministic test support: a manually pumped event loop, a scripted
//! driver, and a counting logger.
//!
//! Nothing here touches a real server. The scripted driver replays
//! per-verb outcomes so scenario tests can exercise every branch of the
//! operation state machines, including `Pending` parking, retries,
//! timeouts, and pause/resume.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use sqlstream_core::{ConnectionKey, EphemeralRow, FailureReason, RowFields};

use crate::connect::CertValidationBridge;
use crate::connection::ConnectionContext;
use crate::event_loop::{EventLoop, FdWatchId, LoopTask, TimerId};
use crate::handler::{
    FetchRowStatus, InternalConnection, InternalResult, IoInterest, MysqlHandler,
    NextResultStatus, Status,
};
use crate::logging::{CommonLoggingData, DbLogger};
use crate::options::{CompressionAlgorithm, ConnectionOptions, SslOptionsProvider};

// ---------------------------------------------------------------------
// Manual event loop
// ---------------------------------------------------------------------

struct ManualTimer {
    id: u64,
    due: Duration,
    task: LoopTask,
}

struct ManualWatch {
    id: u64,
    fd: i32,
    task: LoopTask,
}

#[derive(Default)]
struct ManualInner {
    now: Duration,
    tasks: VecDeque<LoopTask>,
    timers: Vec<ManualTimer>,
    fd_watches: Vec<ManualWatch>,
}

/// An event loop pumped explicitly by the test: virtual time, manual
/// task draining, manual socket readiness.
#[derive(Default)]
pub struct ManualEventLoop {
    inner: Mutex<ManualInner>,
    cb_delay_micros: AtomicU64,
    next_id: AtomicU64,
    pump_thread: Mutex<Option<ThreadId>>,
}

impl ManualEventLoop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pretend the I/O thread is this overloaded, for stall-attribution
    /// scenarios.
    pub fn set_callback_delay_micros(&self, micros: u64) {
        self.cb_delay_micros.store(micros, Ordering::Relaxed);
    }

    /// Drain the task queue, including tasks the drained tasks post.
    pub fn run_ready(&self) {
        let previous = self.mark_pumping();
        loop {
            let task = self.inner.lock().tasks.pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        self.unmark_pumping(previous);
    }

    /// Advance virtual time, firing due timers, then drain the queue.
    pub fn advance(&self, delta: Duration) {
        let previous = self.mark_pumping();
        let due = {
            let mut inner = self.inner.lock();
            inner.now += delta;
            let now = inner.now;
            let mut due: Vec<ManualTimer> = Vec::new();
            let mut i = 0;
            while i < inner.timers.len() {
                if inner.timers[i].due <= now {
                    due.push(inner.timers.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            due.sort_by_key(|t| t.due);
            due
        };
        for timer in due {
            (timer.task)();
        }
        self.unmark_pumping(previous);
        self.run_ready();
    }

    /// Report readiness on `fd`, firing each one-shot watch on it.
    pub fn trigger_fd(&self, fd: i32) {
        let previous = self.mark_pumping();
        let fired = {
            let mut inner = self.inner.lock();
            let mut fired = Vec::new();
            let mut i = 0;
            while i < inner.fd_watches.len() {
                if inner.fd_watches[i].fd == fd {
                    fired.push(inner.fd_watches.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            fired
        };
        for watch in fired {
            (watch.task)();
        }
        self.unmark_pumping(previous);
        self.run_ready();
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn armed_timers(&self) -> usize {
        self.inner.lock().timers.len()
    }

    pub fn watched_fds(&self) -> Vec<i32> {
        self.inner.lock().fd_watches.iter().map(|w| w.fd).collect()
    }

    fn mark_pumping(&self) -> Option<ThreadId> {
        self.pump_thread.lock().replace(thread::current().id())
    }

    fn unmark_pumping(&self, previous: Option<ThreadId>) {
        *self.pump_thread.lock() = previous;
    }
}

impl EventLoop for ManualEventLoop {
    fn run_in_loop(&self, task: LoopTask) -> bool {
        self.inner.lock().tasks.push_back(task);
        true
    }

    fn is_in_loop_thread(&self) -> bool {
        *self.pump_thread.lock() == Some(thread::current().id())
    }

    fn callback_delay_micros_avg(&self) -> u64 {
        self.cb_delay_micros.load(Ordering::Relaxed)
    }

    fn schedule_timeout(&self, delay: Duration, task: LoopTask) -> TimerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let due = inner.now + delay;
        inner.timers.push(ManualTimer { id, due, task });
        TimerId(id)
    }

    fn cancel_timeout(&self, id: TimerId) {
        self.inner.lock().timers.retain(|t| t.id != id.0);
    }

    fn watch_fd(&self, fd: i32, _interest: IoInterest, task: LoopTask) -> FdWatchId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().fd_watches.push(ManualWatch { id, fd, task });
        FdWatchId(id)
    }

    fn unwatch_fd(&self, id: FdWatchId) {
        self.inner.lock().fd_watches.retain(|w| w.id != id.0);
    }
}

// ---------------------------------------------------------------------
// Scripted driver
// ---------------------------------------------------------------------

/// Outcome of one scripted verb invocation.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Done,
    Pending(IoInterest),
    Error { errno: u32, message: String },
}

impl StepOutcome {
    pub fn error(errno: u32, message: impl Into<String>) -> Self {
        StepOutcome::Error {
            errno,
            message: message.into(),
        }
    }
}

/// One scripted row-fetch outcome.
#[derive(Debug, Clone)]
pub enum RowStep {
    Row(Vec<Option<Vec<u8>>>),
    Pending(IoInterest),
    Error { errno: u32, message: String },
}

/// One scripted statement of a multi-query.
#[derive(Debug, Clone, Default)]
pub struct TestStatement {
    pub columns: Vec<String>,
    pub rows: VecDeque<RowStep>,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub gtid: Option<String>,
    pub resp_attrs: Vec<(String, String)>,
    pub no_index_used: bool,
}

impl TestStatement {
    /// A statement returning text rows.
    pub fn with_rows(columns: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| {
                    RowStep::Row(row.iter().map(|v| Some(v.as_bytes().to_vec())).collect())
                })
                .collect(),
            ..Default::default()
        }
    }

    /// A statement producing no result set (INSERT/UPDATE style).
    pub fn no_rows(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Default::default()
        }
    }

    pub fn gtid(mut self, gtid: impl Into<String>) -> Self {
        self.gtid = Some(gtid.into());
        self
    }

    pub fn resp_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resp_attrs.push((key.into(), value.into()));
        self
    }
}

#[derive(Default)]
struct TestState {
    connect_steps: VecDeque<StepOutcome>,
    query_steps: VecDeque<StepOutcome>,
    next_result_steps: VecDeque<StepOutcome>,
    reset_steps: VecDeque<StepOutcome>,
    change_user_steps: VecDeque<StepOutcome>,
    statements: VecDeque<TestStatement>,
    current: Option<TestStatement>,

    errno: u32,
    error_message: String,
    fd: i32,
    tcp_handshake_done: bool,
    stage: String,
    initialized: bool,
    init_count: u32,
    init_mysql_only_count: u32,
    close_count: u32,
    server_version: String,
    tls_version: Option<String>,
    store_session_result: bool,
    session_stored: bool,
    ssl_provider_applied: bool,
    dscp: Option<u8>,
    dscp_ok: bool,
    sni: Option<String>,
    attributes: HashMap<String, String>,
    compression: Option<CompressionAlgorithm>,
    connect_timeout: Option<Duration>,
    kill_supported: bool,
    kill_count: u32,
    connection_id: u32,
    cert_bridge: Option<Arc<CertValidationBridge>>,
    verb_log: Vec<String>,
}

impl TestState {
    fn take_step(queue: &mut VecDeque<StepOutcome>) -> StepOutcome {
        queue.pop_front().unwrap_or(StepOutcome::Done)
    }

    fn apply(&mut self, step: StepOutcome) -> Status {
        match step {
            StepOutcome::Done => Status::Done,
            StepOutcome::Pending(interest) => Status::Pending(interest),
            StepOutcome::Error { errno, message } => {
                self.errno = errno;
                self.error_message = message;
                Status::Error
            }
        }
    }

    fn open_statement(&mut self) {
        self.current = Some(self.statements.pop_front().unwrap_or_default());
    }
}

/// A scripted non-blocking driver.
///
/// Empty scripts default every verb to `Done`, so happy paths need
/// minimal setup. Every verb invocation is appended to a log that tests
/// can assert on (e.g. that no verb runs while a fetch is paused).
pub struct TestHandler {
    state: Arc<Mutex<TestState>>,
}

impl Default for TestHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TestState {
                fd: 11,
                tcp_handshake_done: true,
                stage: "Connecting".to_string(),
                dscp_ok: true,
                store_session_result: true,
                server_version: "8.0.35-test".to_string(),
                connection_id: 7001,
                ..Default::default()
            })),
        }
    }

    pub fn script_connect(&self, steps: Vec<StepOutcome>) {
        self.state.lock().connect_steps = steps.into();
    }

    pub fn script_query(&self, steps: Vec<StepOutcome>) {
        self.state.lock().query_steps = steps.into();
    }

    pub fn script_next_result(&self, steps: Vec<StepOutcome>) {
        self.state.lock().next_result_steps = steps.into();
    }

    pub fn script_reset(&self, steps: Vec<StepOutcome>) {
        self.state.lock().reset_steps = steps.into();
    }

    pub fn script_change_user(&self, steps: Vec<StepOutcome>) {
        self.state.lock().change_user_steps = steps.into();
    }

    pub fn add_statement(&self, statement: TestStatement) {
        self.state.lock().statements.push_back(statement);
    }

    pub fn set_fd(&self, fd: i32) {
        self.state.lock().fd = fd;
    }

    pub fn set_tcp_handshake_done(&self, done: bool) {
        self.state.lock().tcp_handshake_done = done;
    }

    pub fn set_stage(&self, stage: impl Into<String>) {
        self.state.lock().stage = stage.into();
    }

    pub fn set_store_session_result(&self, stored: bool) {
        self.state.lock().store_session_result = stored;
    }

    pub fn set_dscp_ok(&self, ok: bool) {
        self.state.lock().dscp_ok = ok;
    }

    pub fn set_kill_supported(&self, supported: bool) {
        self.state.lock().kill_supported = supported;
    }

    /// Every verb invoked so far, in order.
    pub fn verb_log(&self) -> Vec<String> {
        self.state.lock().verb_log.clone()
    }

    pub fn kill_count(&self) -> u32 {
        self.state.lock().kill_count
    }

    pub fn init_count(&self) -> u32 {
        self.state.lock().init_count
    }

    pub fn init_mysql_only_count(&self) -> u32 {
        self.state.lock().init_mysql_only_count
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().close_count
    }

    pub fn session_stored(&self) -> bool {
        self.state.lock().session_stored
    }

    pub fn ssl_provider_applied(&self) -> bool {
        self.state.lock().ssl_provider_applied
    }

    pub fn applied_sni(&self) -> Option<String> {
        self.state.lock().sni.clone()
    }

    pub fn applied_dscp(&self) -> Option<u8> {
        self.state.lock().dscp
    }

    pub fn applied_attributes(&self) -> HashMap<String, String> {
        self.state.lock().attributes.clone()
    }

    pub fn applied_compression(&self) -> Option<CompressionAlgorithm> {
        self.state.lock().compression
    }

    pub fn applied_connect_timeout(&self) -> Option<Duration> {
        self.state.lock().connect_timeout
    }

    pub fn cert_bridge(&self) -> Option<Arc<CertValidationBridge>> {
        self.state.lock().cert_bridge.clone()
    }

    fn log(&self, verb: &str) {
        self.state.lock().verb_log.push(verb.to_string());
    }
}

impl MysqlHandler for TestHandler {
    fn create_connection(&self, _key: &Arc<ConnectionKey>) -> Box<dyn InternalConnection> {
        self.log("create_connection");
        Box::new(TestConnection {
            state: Arc::clone(&self.state),
        })
    }

    fn try_connect(
        &self,
        _conn: &mut dyn InternalConnection,
        _opts: &ConnectionOptions,
        _key: &Arc<ConnectionKey>,
        _flags: u32,
    ) -> Status {
        self.log("try_connect");
        let mut state = self.state.lock();
        let step = TestState::take_step(&mut state.connect_steps);
        state.apply(step)
    }

    fn run_query(&self, _conn: &mut dyn InternalConnection, _query: &str) -> Status {
        self.log("run_query");
        let mut state = self.state.lock();
        let step = TestState::take_step(&mut state.query_steps);
        let status = state.apply(step);
        if status == Status::Done {
            state.open_statement();
        }
        status
    }

    fn next_result(&self, _conn: &mut dyn InternalConnection) -> NextResultStatus {
        self.log("next_result");
        let mut state = self.state.lock();
        let step = TestState::take_step(&mut state.next_result_steps);
        match state.apply(step) {
            Status::Done => {
                state.open_statement();
                if state.statements.is_empty() {
                    NextResultStatus::Done
                } else {
                    NextResultStatus::MoreResults
                }
            }
            Status::Pending(interest) => NextResultStatus::Pending(interest),
            Status::Error => NextResultStatus::Error,
        }
    }

    fn get_field_count(&self, _conn: &dyn InternalConnection) -> usize {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|s| s.columns.len())
            .unwrap_or(0)
    }

    fn get_result(&self, _conn: &mut dyn InternalConnection) -> Option<Box<dyn InternalResult>> {
        self.log("get_result");
        let state = self.state.lock();
        let columns = state.current.as_ref()?.columns.clone();
        Some(Box::new(TestResult {
            state: Arc::clone(&self.state),
            fields: Arc::new(RowFields::new(columns)),
        }))
    }

    fn fetch_row(
        &self,
        _conn: &mut dyn InternalConnection,
        result: &mut dyn InternalResult,
    ) -> FetchRowStatus {
        self.log("fetch_row");
        let fields = result.row_fields();
        let mut state = self.state.lock();
        let step = state.current.as_mut().and_then(|s| s.rows.pop_front());
        match step {
            None => FetchRowStatus::End,
            Some(RowStep::Row(values)) => {
                FetchRowStatus::Row(EphemeralRow::new(values, fields))
            }
            Some(RowStep::Pending(interest)) => FetchRowStatus::Pending(interest),
            Some(RowStep::Error { errno, message }) => {
                state.errno = errno;
                state.error_message = message;
                FetchRowStatus::Error
            }
        }
    }

    fn reset_conn(&self, _conn: &mut dyn InternalConnection) -> Status {
        self.log("reset_conn");
        let mut state = self.state.lock();
        let step = TestState::take_step(&mut state.reset_steps);
        state.apply(step)
    }

    fn change_user(
        &self,
        _conn: &mut dyn InternalConnection,
        _key: &Arc<ConnectionKey>,
    ) -> Status {
        self.log("change_user");
        let mut state = self.state.lock();
        let step = TestState::take_step(&mut state.change_user_steps);
        state.apply(step)
    }

    fn kill_running_query(&self, _conn: &dyn InternalConnection) -> bool {
        self.log("kill_running_query");
        let mut state = self.state.lock();
        if state.kill_supported {
            state.kill_count += 1;
            true
        } else {
            false
        }
    }
}

/// Driver connection backed by the shared script state.
pub struct TestConnection {
    state: Arc<Mutex<TestState>>,
}

impl InternalConnection for TestConnection {
    fn initialize(&mut self) {
        let mut state = self.state.lock();
        state.init_count += 1;
        state.initialized = true;
    }

    fn init_mysql_only(&mut self) {
        let mut state = self.state.lock();
        state.init_mysql_only_count += 1;
        state.initialized = true;
    }

    fn has_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.close_count += 1;
        state.initialized = false;
    }

    fn errno(&self) -> u32 {
        self.state.lock().errno
    }

    fn error_message(&self) -> String {
        self.state.lock().error_message.clone()
    }

    fn socket_descriptor(&self) -> i32 {
        self.state.lock().fd
    }

    fn is_done_with_tcp_handshake(&self) -> bool {
        self.state.lock().tcp_handshake_done
    }

    fn connect_stage_name(&self) -> String {
        self.state.lock().stage.clone()
    }

    fn connection_id(&self) -> u32 {
        self.state.lock().connection_id
    }

    fn server_version(&self) -> String {
        self.state.lock().server_version.clone()
    }

    fn set_connect_attributes(&mut self, attributes: &HashMap<String, String>) {
        self.state.lock().attributes = attributes.clone();
    }

    fn set_compression(&mut self, algorithm: CompressionAlgorithm) {
        self.state.lock().compression = Some(algorithm);
    }

    fn set_ssl_options_provider(&mut self, _provider: &dyn SslOptionsProvider) -> bool {
        self.state.lock().ssl_provider_applied = true;
        true
    }

    fn set_sni_server_name(&mut self, name: &str) {
        self.state.lock().sni = Some(name.to_string());
    }

    fn set_dscp(&mut self, dscp: u8) -> bool {
        let mut state = self.state.lock();
        state.dscp = Some(dscp);
        state.dscp_ok
    }

    fn set_connect_timeout(&mut self, timeout: Duration) {
        self.state.lock().connect_timeout = Some(timeout);
    }

    fn set_cert_validation_bridge(&mut self, bridge: Arc<CertValidationBridge>) {
        self.state.lock().cert_bridge = Some(bridge);
    }

    fn store_tls_session(&mut self, _provider: &dyn SslOptionsProvider) -> bool {
        let mut state = self.state.lock();
        if state.store_session_result {
            state.session_stored = true;
        }
        state.store_session_result
    }

    fn tls_version(&self) -> Option<String> {
        self.state.lock().tls_version.clone()
    }

    fn affected_rows(&self) -> u64 {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|s| s.affected_rows)
            .unwrap_or(0)
    }

    fn last_insert_id(&self) -> u64 {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|s| s.last_insert_id)
            .unwrap_or(0)
    }

    fn recv_gtid(&self) -> Option<String> {
        self.state.lock().current.as_ref().and_then(|s| s.gtid.clone())
    }

    fn response_attributes(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|s| s.resp_attrs.clone())
            .unwrap_or_default()
    }

    fn more_results_exist(&self) -> bool {
        !self.state.lock().statements.is_empty()
    }

    fn no_index_used(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|s| s.no_index_used)
            .unwrap_or(false)
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

/// Result handle for the scripted driver.
pub struct TestResult {
    #[allow(dead_code)]
    state: Arc<Mutex<TestState>>,
    fields: Arc<RowFields>,
}

impl InternalResult for TestResult {
    fn row_fields(&self) -> Arc<RowFields> {
        Arc::clone(&self.fields)
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------
// Counting logger
// ---------------------------------------------------------------------

/// Logger that counts calls and keeps failure messages for assertions.
#[derive(Default)]
pub struct CountingLogger {
    connection_successes: AtomicUsize,
    connection_failures: AtomicUsize,
    query_successes: AtomicUsize,
    query_failures: AtomicUsize,
    failure_messages: Mutex<Vec<String>>,
}

impl CountingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_successes(&self) -> usize {
        self.connection_successes.load(Ordering::Relaxed)
    }

    pub fn connection_failures(&self) -> usize {
        self.connection_failures.load(Ordering::Relaxed)
    }

    pub fn query_successes(&self) -> usize {
        self.query_successes.load(Ordering::Relaxed)
    }

    pub fn query_failures(&self) -> usize {
        self.query_failures.load(Ordering::Relaxed)
    }

    pub fn failure_messages(&self) -> Vec<String> {
        self.failure_messages.lock().clone()
    }
}

impl DbLogger for CountingLogger {
    fn log_connection_success(
        &self,
        _data: &CommonLoggingData,
        _key: &ConnectionKey,
        _context: &ConnectionContext,
    ) {
        self.connection_successes.fetch_add(1, Ordering::Relaxed);
    }

    fn log_connection_failure(
        &self,
        _data: &CommonLoggingData,
        _reason: FailureReason,
        _key: &ConnectionKey,
        _errno: u32,
        message: &str,
        _context: &ConnectionContext,
    ) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.failure_messages.lock().push(message.to_string());
    }

    fn log_query_success(&self, _data: &CommonLoggingData, _key: &ConnectionKey) {
        self.query_successes.fetch_add(1, Ordering::Relaxed);
    }

    fn log_query_failure(
        &self,
        _data: &CommonLoggingData,
        _reason: FailureReason,
        _key: &ConnectionKey,
        _errno: u32,
        message: &str,
    ) {
        self.query_failures.fetch_add(1, Ordering::Relaxed);
        self.failure_messages.lock().push(message.to_string());
    }
}
