//! Reset-connection and change-user scenarios.

use std::sync::Arc;
use std::time::Duration;

use sqlstream_client::testing::{ManualEventLoop, StepOutcome, TestHandler};
use sqlstream_client::{
    Connection, ConnectionOptions, IoInterest, MysqlClient, OperationResult, OperationState,
    SpecialOperationKind,
};
use sqlstream_core::ConnectionKey;

fn test_key() -> ConnectionKey {
    ConnectionKey::new("db1.test", 3306, "web", "secret", "prod")
}

fn manual_client() -> (MysqlClient, Arc<TestHandler>, Arc<ManualEventLoop>) {
    let handler = Arc::new(TestHandler::new());
    let event_loop = ManualEventLoop::new();
    let client = MysqlClient::new(handler.clone(), event_loop.clone());
    (client, handler, event_loop)
}

fn connect(client: &MysqlClient, event_loop: &ManualEventLoop) -> Connection {
    let op = client.begin_connection(test_key());
    op.run().unwrap();
    event_loop.run_ready();
    assert!(op.ok(), "connect failed: {}", op.mysql_error());
    op.release_connection().unwrap()
}

#[test]
fn reset_conn_succeeds() {
    let (client, handler, event_loop) = manual_client();
    let conn = connect(&client, &event_loop);

    let op = conn.begin_reset();
    assert_eq!(op.kind(), SpecialOperationKind::ResetConn);
    op.run().unwrap();
    event_loop.run_ready();

    assert_eq!(op.result(), OperationResult::Succeeded);
    assert!(handler.verb_log().contains(&"reset_conn".to_string()));
    assert!(op.release_connection().is_ok());
}

#[test]
fn change_user_swaps_connection_key() {
    let (client, handler, event_loop) = manual_client();
    handler.script_change_user(vec![StepOutcome::Pending(IoInterest::Write), StepOutcome::Done]);
    let conn = connect(&client, &event_loop);

    let new_key = Arc::new(ConnectionKey::new("db1.test", 3306, "ops", "hunter2", "admin"));
    let op = conn.begin_change_user(Arc::clone(&new_key));
    op.run().unwrap();
    event_loop.run_ready();
    assert_eq!(op.state(), OperationState::Pending);

    event_loop.trigger_fd(11);
    assert_eq!(op.result(), OperationResult::Succeeded);

    let conn = op.release_connection().unwrap();
    assert_eq!(conn.key().as_ref(), new_key.as_ref());
}

#[test]
fn change_user_failure_keeps_old_key() {
    let (client, handler, event_loop) = manual_client();
    handler.script_change_user(vec![StepOutcome::error(1045, "Access denied for user")]);
    let conn = connect(&client, &event_loop);

    let old_key = Arc::clone(conn.key());
    let new_key = Arc::new(ConnectionKey::new("db1.test", 3306, "ops", "wrong", "admin"));
    let op = conn.begin_change_user(new_key);
    op.run().unwrap();
    event_loop.run_ready();

    assert_eq!(op.result(), OperationResult::Failed);
    assert_eq!(op.mysql_errno(), 1045);
    let conn = op.release_connection().unwrap();
    assert_eq!(conn.key().as_ref(), old_key.as_ref());
}

#[test]
fn reset_conn_times_out() {
    let (client, handler, event_loop) = manual_client();
    handler.script_reset(vec![StepOutcome::Pending(IoInterest::Read)]);

    let connect_op = client.begin_connection(test_key());
    connect_op
        .set_connection_options(
            &ConnectionOptions::new().query_timeout(Duration::from_millis(40)),
        )
        .unwrap();
    connect_op.run().unwrap();
    event_loop.run_ready();
    let conn = connect_op.release_connection().unwrap();

    let op = conn.begin_reset();
    op.run().unwrap();
    event_loop.run_ready();
    assert_eq!(op.state(), OperationState::Pending);

    event_loop.advance(Duration::from_millis(40));
    assert_eq!(op.result(), OperationResult::TimedOut);
    assert!(op.mysql_error().contains("ResetConn timed out"));
}
