//! The synchronous (inline) and asynchronous (threaded) client
//! variants drive the same operation state machines.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sqlstream_client::testing::{StepOutcome, TestHandler, TestStatement};
use sqlstream_client::{
    ConnectionOptions, Error, FetchCallbacks, FetchContext, IoInterest, MysqlClient,
    OperationResult,
};
use sqlstream_core::ConnectionKey;

fn test_key() -> ConnectionKey {
    ConnectionKey::new("db1.test", 3306, "web", "secret", "prod")
}

struct CollectRows {
    rows: Arc<Mutex<Vec<String>>>,
}

impl FetchCallbacks for CollectRows {
    fn on_rows_ready(&mut self, op: &mut FetchContext<'_>) {
        if let Some(stream) = op.row_stream() {
            while let Some(row) = stream.consume_row() {
                self.rows
                    .lock()
                    .unwrap()
                    .push(row.text_at(0).unwrap_or("<null>").to_string());
            }
        }
    }
}

#[test]
fn synchronous_connect_completes_inline() {
    let handler = Arc::new(TestHandler::new());
    let client = MysqlClient::synchronous(handler.clone());

    let conn = client
        .connect(test_key(), &ConnectionOptions::new())
        .expect("inline connect");
    assert_eq!(conn.server_version().as_deref(), Some("8.0.35-test"));
    assert_eq!(client.stats().opened_connections(), 1);
    assert_eq!(handler.init_count(), 1);
}

#[test]
fn synchronous_query_runs_to_completion_during_run() {
    let handler = Arc::new(TestHandler::new());
    handler.add_statement(TestStatement::with_rows(&["v"], &[&["42"]]));
    let client = MysqlClient::synchronous(handler);

    let conn = client
        .connect(test_key(), &ConnectionOptions::new())
        .unwrap();

    let rows = Arc::new(Mutex::new(Vec::new()));
    let op = conn.begin_query(
        "SELECT v FROM t",
        Box::new(CollectRows {
            rows: Arc::clone(&rows),
        }),
    );
    op.run().unwrap();

    // The inline loop already finished the whole dialogue; wait() is a
    // no-op here.
    op.wait();
    assert_eq!(op.result(), OperationResult::Succeeded);
    assert_eq!(op.num_queries_executed().unwrap(), 1);
    assert_eq!(*rows.lock().unwrap(), vec!["42"]);
}

#[test]
fn synchronous_connect_failure_surfaces_errno() {
    let handler = Arc::new(TestHandler::new());
    handler.script_connect(vec![StepOutcome::error(1045, "Access denied for user")]);
    let client = MysqlClient::synchronous(handler);

    let err = client
        .connect(test_key(), &ConnectionOptions::new())
        .expect_err("connect must fail");
    match err {
        Error::OperationFailed(failure) => {
            assert_eq!(failure.errno, 1045);
            assert_eq!(failure.result, OperationResult::Failed);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.stats().failed_connections(), 1);
}

#[test]
fn threaded_connect_and_wait() {
    let handler = Arc::new(TestHandler::new());
    let client = MysqlClient::asynchronous(handler);

    let op = client.begin_connection(test_key());
    op.run().unwrap();
    op.wait();
    assert_eq!(op.result(), OperationResult::Succeeded);
    assert_eq!(op.attempts_made(), 1);
}

#[test]
fn threaded_connect_times_out_with_real_timers() {
    let handler = Arc::new(TestHandler::new());
    handler.script_connect(vec![StepOutcome::Pending(IoInterest::Read)]);
    let client = MysqlClient::asynchronous(handler);

    let opts = ConnectionOptions::new()
        .timeout(Duration::from_millis(30))
        .total_timeout(Duration::from_millis(30))
        .connect_attempts(1);

    let started = Instant::now();
    let err = client.connect(test_key(), &opts).expect_err("must time out");
    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        Error::OperationFailed(failure) => {
            assert_eq!(failure.result, OperationResult::TimedOut);
            assert!(failure.message.contains("timed out"), "{}", failure.message);
        }
        other => panic!("unexpected error: {other}"),
    }
}
