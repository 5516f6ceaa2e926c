//! Attempt-based connect operation.
//!
//! A connect is a retry loop: each attempt re-initializes the driver
//! connection, applies connection options, and drives `try_connect`
//! until it reports `Done` or `Error`. A failed attempt retries while
//! the attempt budget and the total-timeout window allow; timeouts are
//! layered (per-attempt, total, and a TCP-handshake-only sub-timeout)
//! and the timeout error message attributes the cause, including event
//! loop stall detection.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use sqlstream_core::{
    ClientErrno, ConnectionKey, FailureReason, OperationResult, OperationState, OperationType,
    Result,
};

use crate::client::MysqlClient;
use crate::connection::{Connection, ConnectionContext};
use crate::handler::{capabilities, Status};
use crate::logging::CommonLoggingData;
use crate::operation::{
    arm_operation_timer, clear_registrations, connect_timeout_error, finish_completion,
    wait_for_actionable, BaseCore, Operation, OperationCore,
};
use crate::options::{
    CertValidationContext, CertValidationOptions, CompressionAlgorithm, ConnectionOptions,
    ServerCert, SslOptionsProvider,
};

/// Callback fired exactly once when the connect completes.
pub type ConnectCallback = Box<dyn FnOnce(&ConnectOperation) + Send + 'static>;

/// A connect request; see [`MysqlClient::begin_connection`].
pub type ConnectOperation = Operation<ConnectCore>;

/// Connect-specific operation state.
pub struct ConnectCore {
    pub(crate) base: BaseCore,
    key: Arc<ConnectionKey>,
    conn_options: ConnectionOptions,
    flags: u32,
    attempts_made: u32,
    attempt_started_at: Option<Instant>,
    active_in_client: bool,
    kill_on_query_timeout: bool,
    tcp_timer: Option<crate::event_loop::TimerId>,
    connect_callback: Option<ConnectCallback>,
    context: ConnectionContext,
}

impl OperationCore for ConnectCore {
    fn base(&mut self) -> &mut BaseCore {
        &mut self.base
    }

    fn base_ref(&self) -> &BaseCore {
        &self.base
    }

    fn op_type(&self) -> OperationType {
        OperationType::Connect
    }

    fn run_started(op: &Arc<ConnectOperation>) {
        let callback = {
            let mut core = op.core.lock();
            if core.base.state == OperationState::Completed {
                None
            } else {
                specialized_run_impl(op, &mut core)
            }
        };
        fire_callback(op, callback);
    }

    fn io_ready(op: &Arc<ConnectOperation>) {
        let callback = {
            let mut core = op.core.lock();
            if core.base.state == OperationState::Completed {
                None
            } else {
                core.base.fd_watch = None;
                actionable(op, &mut core)
            }
        };
        fire_callback(op, callback);
    }

    fn timeout_fired(op: &Arc<ConnectOperation>) {
        let callback = {
            let mut core = op.core.lock();
            if core.base.state == OperationState::Completed {
                None
            } else {
                timeout_handler(op, &mut core, false)
            }
        };
        fire_callback(op, callback);
    }

    fn resolve_cancel(op: &Arc<ConnectOperation>) {
        Self::complete_now(op, OperationResult::Cancelled);
    }

    fn complete_now(op: &Arc<ConnectOperation>, result: OperationResult) {
        let callback = {
            let mut core = op.core.lock();
            if core.base.state == OperationState::Completed {
                None
            } else {
                complete_operation(op, &mut core, result)
            }
        };
        fire_callback(op, callback);
    }
}

impl ConnectOperation {
    pub(crate) fn create(client: &MysqlClient, key: Arc<ConnectionKey>) -> Arc<ConnectOperation> {
        let conn = Connection::new(client.clone(), Arc::clone(&key));
        let options = ConnectionOptions::default();
        let timeout = options.get_timeout().min(options.get_total_timeout());
        client.active_connection_added();
        Operation::new(
            client.clone(),
            ConnectCore {
                base: BaseCore::new(conn, timeout),
                key,
                conn_options: options,
                flags: capabilities::CLIENT_MULTI_STATEMENTS,
                attempts_made: 0,
                attempt_started_at: None,
                active_in_client: true,
                kill_on_query_timeout: false,
                tcp_timer: None,
                connect_callback: None,
                context: ConnectionContext::default(),
            },
        )
    }

    /// Number of attempts made so far (valid at any time).
    pub fn attempts_made(&self) -> u32 {
        self.core.lock().attempts_made
    }

    pub fn connection_key(&self) -> Arc<ConnectionKey> {
        Arc::clone(&self.core.lock().key)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        self.core.lock().conn_options.clone()
    }

    pub fn connection_context(&self) -> ConnectionContext {
        self.core.lock().context.clone()
    }

    /// Apply a whole options record, field by field.
    pub fn set_connection_options(self: &Arc<Self>, opts: &ConnectionOptions) -> Result<()> {
        self.set_timeout(opts.get_timeout());
        self.set_default_query_timeout(opts.get_query_timeout())?;
        self.set_attributes(opts.get_attributes().clone())?;
        self.set_connect_attempts(opts.get_connect_attempts())?;
        if let Some(dscp) = opts.get_dscp() {
            self.set_dscp(dscp)?;
        }
        self.set_total_timeout(opts.get_total_timeout());
        if let Some(algorithm) = opts.get_compression() {
            self.set_compression(algorithm)?;
        }
        if let Some(tcp_timeout) = opts.get_connect_tcp_timeout() {
            self.set_tcp_timeout(tcp_timeout)?;
        }
        if let Some(name) = opts.get_sni_server_name() {
            self.set_sni_server_name(name)?;
        }
        if let Some(provider) = opts.get_ssl_options_provider() {
            self.set_ssl_options_provider(Arc::clone(provider))?;
        }
        if let Some(validation) = opts.get_cert_validation() {
            self.set_cert_validation(validation.clone())?;
        }
        if opts.is_reset_conn_before_close() {
            self.enable_reset_conn_before_close()?;
        }
        if opts.is_delayed_reset_conn() {
            self.enable_delayed_reset_conn()?;
        }
        if opts.is_change_user_enabled() {
            self.enable_change_user()?;
        }
        Ok(())
    }

    /// Set the per-attempt timeout. Unlike the other setters this is
    /// legal while running; it recomputes the current attempt's
    /// deadline, capped by the total timeout.
    pub fn set_timeout(self: &Arc<Self>, timeout: Duration) {
        let mut core = self.core.lock();
        core.conn_options.set_timeout_value(timeout);
        rearm_capped_timeout(self, &mut core);
    }

    /// Set the budget across all attempts; also legal while running.
    pub fn set_total_timeout(self: &Arc<Self>, total: Duration) {
        let mut core = self.core.lock();
        core.conn_options.set_total_timeout_value(total);
        rearm_capped_timeout(self, &mut core);
    }

    pub fn set_default_query_timeout(&self, timeout: Duration) -> Result<()> {
        let mut core = self.unstarted_core("set_default_query_timeout")?;
        core.conn_options.set_query_timeout_value(timeout);
        Ok(())
    }

    pub fn set_tcp_timeout(&self, timeout: Duration) -> Result<()> {
        let mut core = self.unstarted_core("set_tcp_timeout")?;
        core.conn_options.set_connect_tcp_timeout_value(timeout);
        Ok(())
    }

    pub fn set_connect_attempts(&self, attempts: u32) -> Result<()> {
        let mut core = self.unstarted_core("set_connect_attempts")?;
        core.conn_options.set_connect_attempts_value(attempts);
        Ok(())
    }

    pub fn set_attributes(&self, attributes: HashMap<String, String>) -> Result<()> {
        let mut core = self.unstarted_core("set_attributes")?;
        core.conn_options.set_attributes_value(attributes);
        Ok(())
    }

    pub fn set_compression(&self, algorithm: CompressionAlgorithm) -> Result<()> {
        let mut core = self.unstarted_core("set_compression")?;
        core.conn_options.set_compression_value(algorithm);
        Ok(())
    }

    pub fn set_ssl_options_provider(&self, provider: Arc<dyn SslOptionsProvider>) -> Result<()> {
        let mut core = self.unstarted_core("set_ssl_options_provider")?;
        core.conn_options.set_ssl_provider_value(provider);
        Ok(())
    }

    pub fn set_sni_server_name(&self, name: impl Into<String>) -> Result<()> {
        let mut core = self.unstarted_core("set_sni_server_name")?;
        core.conn_options.set_sni_server_name_value(name.into());
        Ok(())
    }

    pub fn set_dscp(&self, dscp: u8) -> Result<()> {
        if dscp > 63 {
            return Err(sqlstream_core::Error::InvalidOption(
                sqlstream_core::InvalidOptionError {
                    option: "dscp",
                    message: format!("{dscp} is outside the 6-bit DSCP range"),
                },
            ));
        }
        let mut core = self.unstarted_core("set_dscp")?;
        core.conn_options.set_dscp_value(dscp);
        Ok(())
    }

    pub fn set_kill_on_query_timeout(&self, kill: bool) -> Result<()> {
        let mut core = self.unstarted_core("set_kill_on_query_timeout")?;
        core.kill_on_query_timeout = kill;
        Ok(())
    }

    pub fn set_cert_validation(&self, validation: CertValidationOptions) -> Result<()> {
        let mut core = self.unstarted_core("set_cert_validation")?;
        core.conn_options.set_cert_validation_value(validation);
        Ok(())
    }

    pub fn enable_reset_conn_before_close(&self) -> Result<()> {
        let mut core = self.unstarted_core("enable_reset_conn_before_close")?;
        core.conn_options.enable_reset_conn_before_close();
        Ok(())
    }

    pub fn enable_delayed_reset_conn(&self) -> Result<()> {
        let mut core = self.unstarted_core("enable_delayed_reset_conn")?;
        core.conn_options.enable_delayed_reset_conn();
        Ok(())
    }

    pub fn enable_change_user(&self) -> Result<()> {
        let mut core = self.unstarted_core("enable_change_user")?;
        core.conn_options.enable_change_user();
        Ok(())
    }

    /// Add capability flags on top of `CLIENT_MULTI_STATEMENTS`.
    pub fn add_connection_flags(&self, flags: u32) -> Result<()> {
        let mut core = self.unstarted_core("add_connection_flags")?;
        core.flags |= flags;
        Ok(())
    }

    /// Install the completion callback.
    pub fn set_callback(&self, callback: ConnectCallback) -> Result<()> {
        let mut core = self.unstarted_core("set_callback")?;
        core.connect_callback = Some(callback);
        Ok(())
    }

    fn unstarted_core(
        &self,
        what: &'static str,
    ) -> Result<parking_lot::MutexGuard<'_, ConnectCore>> {
        let core = self.core.lock();
        if core.base.state != OperationState::Unstarted {
            return Err(sqlstream_core::Error::invalid_state(what, core.base.state));
        }
        Ok(core)
    }
}

/// Cap the armed deadline at `min(per_attempt, total)` and rearm it
/// relative to the current attempt when the operation is in flight.
fn rearm_capped_timeout(op: &Arc<ConnectOperation>, core: &mut ConnectCore) {
    let capped = core
        .conn_options
        .get_timeout()
        .min(core.conn_options.get_total_timeout());
    core.base.timeout = capped;

    if matches!(
        core.base.state,
        OperationState::Pending | OperationState::Cancelling
    ) {
        let attempt_elapsed = core
            .attempt_started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let remaining = capped
            .saturating_sub(attempt_elapsed)
            .max(Duration::from_millis(1));
        arm_operation_timer(op, &mut core.base, remaining);
    }
}

fn fire_callback(op: &Arc<ConnectOperation>, callback: Option<ConnectCallback>) {
    if let Some(callback) = callback {
        callback(op);
    }
}

/// One connect attempt: (re)initialize the driver connection, apply
/// options, arm the TCP-handshake timer, and tick `actionable`.
fn specialized_run_impl(
    op: &Arc<ConnectOperation>,
    core: &mut ConnectCore,
) -> Option<ConnectCallback> {
    core.attempt_started_at = Some(Instant::now());

    {
        let conn = core.base.conn.as_mut().expect("operation owns its connection");
        if core.attempts_made == 0 {
            conn.internal_mut().initialize();
        } else {
            conn.internal_mut().init_mysql_only();
        }
    }
    remove_client_reference(op.client(), core);

    {
        let ConnectCore {
            base,
            conn_options,
            context,
            ..
        } = &mut *core;
        let conn = base.conn.as_mut().expect("operation owns its connection");

        conn.internal_mut()
            .set_connect_attributes(conn_options.get_attributes());

        if let Some(algorithm) = conn_options.get_compression() {
            conn.internal_mut().set_compression(algorithm);
        }

        if let Some(provider) = conn_options.get_ssl_options_provider() {
            if conn.internal_mut().set_ssl_options_provider(provider.as_ref()) {
                context.is_ssl_connection = true;
            }
        }

        if let Some(name) = conn_options.get_sni_server_name() {
            conn.internal_mut().set_sni_server_name(name);
        }

        if let Some(dscp) = conn_options.get_dscp() {
            if !conn.internal_mut().set_dscp(dscp) {
                tracing::warn!(dscp, "failed to set DSCP for MySQL client socket");
            }
        }

        if let Some(validation) = conn_options.get_cert_validation() {
            let bridge = Arc::new(CertValidationBridge::new(Arc::downgrade(op), validation));
            conn.internal_mut().set_cert_validation_bridge(bridge);
        }
    }

    // TCP-handshake timeout: explicit option, or the client default.
    // Zero disables both the driver timeout and the sub-timer.
    let tcp_timeout = core
        .conn_options
        .get_connect_tcp_timeout()
        .unwrap_or_else(|| op.client().default_tcp_timeout());
    if !tcp_timeout.is_zero() {
        core.base
            .conn
            .as_mut()
            .expect("operation owns its connection")
            .internal_mut()
            .set_connect_timeout(tcp_timeout);
        let task_op = Arc::clone(op);
        let id = op.event_loop().schedule_timeout(
            tcp_timeout,
            Box::new(move || tcp_timeout_fired(&task_op)),
        );
        core.tcp_timer = Some(id);
    }

    // A connect is immediately ready for one tick.
    actionable(op, core)
}

fn actionable(op: &Arc<ConnectOperation>, core: &mut ConnectCore) -> Option<ConnectCallback> {
    let using_unix_socket = core.key.uses_unix_socket();
    let handler = op.client().handler();

    let status = {
        let ConnectCore {
            base,
            conn_options,
            key,
            flags,
            ..
        } = &mut *core;
        let conn = base.conn.as_mut().expect("operation owns its connection");
        handler.try_connect(conn.internal_mut(), conn_options, key, *flags)
    };

    if status == Status::Error {
        core.base.snapshot_conn_error();
        return attempt_failed(op, core, OperationResult::Failed);
    }

    let handshake_done = {
        let conn = core.base.conn.as_ref().expect("operation owns its connection");
        conn.internal().is_done_with_tcp_handshake()
    };
    if handshake_done || using_unix_socket {
        if let Some(id) = core.tcp_timer.take() {
            op.event_loop().cancel_timeout(id);
        }
    }

    let fd = core
        .base
        .conn
        .as_ref()
        .expect("operation owns its connection")
        .internal()
        .socket_descriptor();
    if fd <= 0 {
        tracing::error!(
            fd,
            ?status,
            "unexpected invalid socket descriptor on connect"
        );
        core.base.set_client_error(
            ClientErrno::InitializationFailed.code(),
            "the driver returned an invalid socket descriptor",
        );
        return attempt_failed(op, core, OperationResult::Failed);
    }

    match status {
        Status::Done => attempt_succeeded(op, core, OperationResult::Succeeded),
        Status::Pending(interest) => {
            wait_for_actionable(op, &mut core.base, interest);
            None
        }
        Status::Error => unreachable!("handled above"),
    }
}

fn should_complete_operation(
    core: &BaseCore,
    conn_options: &ConnectionOptions,
    attempts_made: u32,
    result: OperationResult,
) -> bool {
    if attempts_made >= conn_options.get_connect_attempts()
        || result == OperationResult::Cancelled
        || core.cancel_requested
    {
        return true;
    }
    core.has_elapsed(conn_options.get_total_timeout() + Duration::from_millis(1))
}

fn attempt_failed(
    op: &Arc<ConnectOperation>,
    core: &mut ConnectCore,
    result: OperationResult,
) -> Option<ConnectCallback> {
    core.attempts_made += 1;
    if should_complete_operation(&core.base, &core.conn_options, core.attempts_made, result) {
        return complete_operation(op, core, result);
    }

    log_connect_completed(op, core, result);

    if let Some(id) = core.tcp_timer.take() {
        op.event_loop().cancel_timeout(id);
    }
    clear_registrations(op.event_loop().as_ref(), &mut core.base);
    core.base
        .conn
        .as_mut()
        .expect("operation owns its connection")
        .internal_mut()
        .close();

    // Give the next attempt a fresh per-attempt window, capped by what
    // is left of the total budget.
    let elapsed = core.base.elapsed();
    let attempt_based = core.conn_options.get_timeout() + elapsed;
    let next_deadline = attempt_based.min(core.conn_options.get_total_timeout());
    core.base.timeout = next_deadline;
    let remaining = next_deadline
        .saturating_sub(elapsed)
        .max(Duration::from_millis(1));
    arm_operation_timer(op, &mut core.base, remaining);

    tracing::debug!(
        attempt = core.attempts_made,
        ?result,
        "connect attempt failed; retrying"
    );
    specialized_run_impl(op, core)
}

fn attempt_succeeded(
    op: &Arc<ConnectOperation>,
    core: &mut ConnectCore,
    result: OperationResult,
) -> Option<ConnectCallback> {
    core.attempts_made += 1;
    complete_operation(op, core, result)
}

fn timeout_handler(
    op: &Arc<ConnectOperation>,
    core: &mut ConnectCore,
    is_tcp_timeout: bool,
) -> Option<ConnectCallback> {
    let stage = core
        .base
        .conn
        .as_ref()
        .expect("operation owns its connection")
        .internal()
        .connect_stage_name();
    let (errno, message) = connect_timeout_error(
        op.client(),
        &core.key,
        &stage,
        core.base.elapsed(),
        core.base.timeout,
        is_tcp_timeout,
    );
    core.base.set_client_error(errno, message);
    attempt_failed(op, core, OperationResult::TimedOut)
}

fn tcp_timeout_fired(op: &Arc<ConnectOperation>) {
    let callback = {
        let mut core = op.core.lock();
        core.tcp_timer = None;
        if core.base.state == OperationState::Completed {
            None
        } else {
            let handshake_done = core
                .base
                .conn
                .as_ref()
                .map(|c| c.internal().is_done_with_tcp_handshake())
                .unwrap_or(true);
            if handshake_done {
                // Progress was made; the per-attempt timer still covers us.
                None
            } else {
                timeout_handler(op, &mut core, true)
            }
        }
    };
    fire_callback(op, callback);
}

fn complete_operation(
    op: &Arc<ConnectOperation>,
    core: &mut ConnectCore,
    result: OperationResult,
) -> Option<ConnectCallback> {
    if let Some(id) = core.tcp_timer.take() {
        op.event_loop().cancel_timeout(id);
    }
    clear_registrations(op.event_loop().as_ref(), &mut core.base);
    let result = finish_completion(&mut core.base, result);

    // Only a connect may store the TLS session: propagating a session
    // across operations could leak it between client cert identities.
    if result == OperationResult::Succeeded {
        let ConnectCore {
            base,
            conn_options,
            context,
            ..
        } = &mut *core;
        let conn = base.conn.as_mut().expect("operation owns its connection");
        if conn.internal().has_initialized() {
            if let Some(provider) = conn_options.get_ssl_options_provider() {
                if conn.internal_mut().store_tls_session(provider.as_ref()) {
                    context.ssl_session_reused = true;
                    op.client().stats().incr_reused_tls_sessions();
                }
            }
            context.ssl_version = conn.internal().tls_version();
            context.endpoint_version = Some(conn.internal().server_version());
        }
    }

    log_connect_completed(op, core, result);
    if result == OperationResult::Succeeded {
        op.client().stats().incr_opened_connections();
    } else {
        op.client().stats().incr_failed_connections();
    }

    // Hand the surviving connection its configuration.
    {
        let ConnectCore {
            base,
            conn_options,
            context,
            kill_on_query_timeout,
            ..
        } = &mut *core;
        let conn = base.conn.as_mut().expect("operation owns its connection");
        conn.set_connection_options(conn_options.clone());
        conn.set_kill_on_query_timeout(*kill_on_query_timeout);
        conn.set_context(context.clone());
    }

    remove_client_reference(op.client(), core);
    op.shared.completed_cv.notify_all();
    core.connect_callback.take()
}

fn log_connect_completed(op: &Arc<ConnectOperation>, core: &ConnectCore, result: OperationResult) {
    // A connection that never initialized means the operation was
    // cancelled before anything started; nothing to log.
    let initialized = core
        .base
        .conn
        .as_ref()
        .map(|c| c.internal().has_initialized())
        .unwrap_or(false);
    if !initialized {
        return;
    }

    let data = CommonLoggingData {
        op_type: OperationType::Connect,
        elapsed: core.base.elapsed(),
        timeout: core.base.timeout,
    };
    if result == OperationResult::Succeeded {
        op.client()
            .logger()
            .log_connection_success(&data, &core.key, &core.context);
    } else {
        op.client().logger().log_connection_failure(
            &data,
            FailureReason::from_result(result),
            &core.key,
            core.base.mysql_errno,
            &core.base.mysql_error,
            &core.context,
        );
    }
}

fn remove_client_reference(client: &MysqlClient, core: &mut ConnectCore) {
    if core.active_in_client {
        core.active_in_client = false;
        client.active_connection_removed();
    }
}

/// Adapter between the driver's certificate callback and the user's
/// validation callback.
///
/// The driver holds this bridge for the lifetime of the TLS handshake;
/// the bridge holds only a weak reference back to the operation. If the
/// operation is gone by the time the driver validates, validation fails
/// safely. The callback and its context are captured at bridge creation,
/// which is sound because options are frozen once the operation runs.
pub struct CertValidationBridge {
    op: Weak<ConnectOperation>,
    validation: CertValidationOptions,
}

impl CertValidationBridge {
    fn new(op: Weak<ConnectOperation>, validation: &CertValidationOptions) -> Self {
        Self {
            op,
            validation: validation.clone(),
        }
    }

    /// Drivers call this during the TLS handshake. Returns 0 when the
    /// certificate is acceptable and 1 when it is not, copying any
    /// error description into `error_out`.
    pub fn validate(&self, cert: &ServerCert, error_out: &mut Option<String>) -> i32 {
        let Some(op) = self.op.upgrade() else {
            tracing::error!("connect operation destroyed before certificate validation");
            return 1;
        };

        let mut error = None;
        let valid = if self.validation.op_as_context {
            (self.validation.callback)(cert, CertValidationContext::Operation(&op), &mut error)
        } else if let Some(context) = &self.validation.context {
            (self.validation.callback)(cert, CertValidationContext::User(context.as_ref()), &mut error)
        } else {
            (self.validation.callback)(cert, CertValidationContext::None, &mut error)
        };

        if error.is_some() {
            *error_out = error;
        }
        if valid {
            0
        } else {
            1
        }
    }
}
