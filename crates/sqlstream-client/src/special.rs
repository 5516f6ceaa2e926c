//! Special operations: session reset and change-user.
//!
//! Both are single-verb dialogues over an established connection. They
//! reuse the shared operation lifecycle; the only specialization is
//! which handler verb drives them and, for change-user, swapping the
//! connection key on success.

use std::sync::Arc;

use sqlstream_core::{
    ConnectionKey, FailureReason, OperationResult, OperationState, OperationType,
};

use crate::connection::Connection;
use crate::handler::Status;
use crate::logging::CommonLoggingData;
use crate::operation::{
    clear_registrations, finish_completion, operation_timeout_error, wait_for_actionable,
    BaseCore, Operation, OperationCore,
};

/// Callback fired exactly once when the special operation completes.
pub type SpecialCallback = Box<dyn FnOnce(&SpecialOperation) + Send + 'static>;

/// Which dialogue a [`SpecialOperation`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialOperationKind {
    ResetConn,
    ChangeUser,
}

impl SpecialOperationKind {
    const fn op_type(self) -> OperationType {
        match self {
            SpecialOperationKind::ResetConn => OperationType::ResetConn,
            SpecialOperationKind::ChangeUser => OperationType::ChangeUser,
        }
    }
}

/// A reset or change-user request; see [`Connection::begin_reset`] and
/// [`Connection::begin_change_user`].
pub type SpecialOperation = Operation<SpecialCore>;

/// State for reset / change-user operations.
pub struct SpecialCore {
    pub(crate) base: BaseCore,
    kind: SpecialOperationKind,
    key: Arc<ConnectionKey>,
    /// Target identity for change-user
    target_key: Option<Arc<ConnectionKey>>,
    callback: Option<SpecialCallback>,
}

impl OperationCore for SpecialCore {
    fn base(&mut self) -> &mut BaseCore {
        &mut self.base
    }

    fn base_ref(&self) -> &BaseCore {
        &self.base
    }

    fn op_type(&self) -> OperationType {
        self.kind.op_type()
    }

    fn run_started(op: &Arc<SpecialOperation>) {
        let callback = {
            let mut core = op.core.lock();
            if core.base.state == OperationState::Completed {
                None
            } else {
                actionable(op, &mut core)
            }
        };
        fire_callback(op, callback);
    }

    fn io_ready(op: &Arc<SpecialOperation>) {
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

    fn timeout_fired(op: &Arc<SpecialOperation>) {
        let callback = {
            let mut core = op.core.lock();
            if core.base.state == OperationState::Completed {
                None
            } else {
                core.base.timer = None;
                let what = core.kind.op_type().name();
                let (errno, message) = operation_timeout_error(
                    op.client(),
                    what,
                    core.base.elapsed(),
                    core.base.timeout,
                );
                core.base.set_client_error(errno, message);
                complete_operation(op, &mut core, OperationResult::TimedOut)
            }
        };
        fire_callback(op, callback);
    }

    fn resolve_cancel(op: &Arc<SpecialOperation>) {
        Self::complete_now(op, OperationResult::Cancelled);
    }

    fn complete_now(op: &Arc<SpecialOperation>, result: OperationResult) {
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

impl SpecialOperation {
    pub(crate) fn create_reset(conn: Connection) -> Arc<SpecialOperation> {
        Self::create(conn, SpecialOperationKind::ResetConn, None)
    }

    pub(crate) fn create_change_user(
        conn: Connection,
        target_key: Arc<ConnectionKey>,
    ) -> Arc<SpecialOperation> {
        Self::create(conn, SpecialOperationKind::ChangeUser, Some(target_key))
    }

    fn create(
        conn: Connection,
        kind: SpecialOperationKind,
        target_key: Option<Arc<ConnectionKey>>,
    ) -> Arc<SpecialOperation> {
        let client = conn.client().clone();
        let key = Arc::clone(conn.key());
        let timeout = conn.options().get_query_timeout();
        Operation::new(
            client,
            SpecialCore {
                base: BaseCore::new(conn, timeout),
                kind,
                key,
                target_key,
                callback: None,
            },
        )
    }

    pub fn kind(&self) -> SpecialOperationKind {
        self.core.lock().kind
    }

    /// Install the completion callback.
    pub fn set_callback(&self, callback: SpecialCallback) -> sqlstream_core::Result<()> {
        let mut core = self.core.lock();
        if core.base.state != OperationState::Unstarted {
            return Err(sqlstream_core::Error::invalid_state(
                "set_callback",
                core.base.state,
            ));
        }
        core.callback = Some(callback);
        Ok(())
    }
}

fn fire_callback(op: &Arc<SpecialOperation>, callback: Option<SpecialCallback>) {
    if let Some(callback) = callback {
        callback(op);
    }
}

fn actionable(op: &Arc<SpecialOperation>, core: &mut SpecialCore) -> Option<SpecialCallback> {
    let handler = op.client().handler();
    let status = {
        let SpecialCore {
            base,
            kind,
            target_key,
            ..
        } = &mut *core;
        let conn = base.conn.as_mut().expect("operation owns its connection");
        match kind {
            SpecialOperationKind::ResetConn => handler.reset_conn(conn.internal_mut()),
            SpecialOperationKind::ChangeUser => {
                let target = target_key.as_ref().expect("change-user has a target key");
                handler.change_user(conn.internal_mut(), target)
            }
        }
    };

    match status {
        Status::Pending(interest) => {
            wait_for_actionable(op, &mut core.base, interest);
            None
        }
        Status::Error => {
            core.base.snapshot_conn_error();
            complete_operation(op, core, OperationResult::Failed)
        }
        Status::Done => {
            if core.kind == SpecialOperationKind::ChangeUser {
                let target = core.target_key.clone().expect("change-user has a target key");
                core.base
                    .conn
                    .as_mut()
                    .expect("operation owns its connection")
                    .set_key(target);
            }
            complete_operation(op, core, OperationResult::Succeeded)
        }
    }
}

fn complete_operation(
    op: &Arc<SpecialOperation>,
    core: &mut SpecialCore,
    result: OperationResult,
) -> Option<SpecialCallback> {
    clear_registrations(&*op.event_loop(), &mut core.base);
    let result = finish_completion(&mut core.base, result);

    let data = CommonLoggingData {
        op_type: core.kind.op_type(),
        elapsed: core.base.elapsed(),
        timeout: core.base.timeout,
    };
    if result == OperationResult::Succeeded {
        op.client().logger().log_query_success(&data, &core.key);
    } else {
        op.client().logger().log_query_failure(
            &data,
            FailureReason::from_result(result),
            &core.key,
            core.base.mysql_errno,
            &core.base.mysql_error,
        );
    }

    op.shared.completed_cv.notify_all();
    core.callback.take()
}
