//! Fetch operation scenarios: streamed rows, multi-statement
//! accounting, pause/resume from another thread, cancellation, and
//! accessor state guards.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlstream_client::testing::{ManualEventLoop, RowStep, StepOutcome, TestHandler, TestStatement};
use sqlstream_client::{
    Connection, ConnectionOptions, Error, FetchCallbacks, FetchContext, IoInterest, MultiQuery,
    MysqlClient, OperationResult, OperationState,
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

fn connect(client: &MysqlClient, event_loop: &ManualEventLoop, opts: &ConnectionOptions) -> Connection {
    let op = client.begin_connection(test_key());
    op.set_connection_options(opts).unwrap();
    op.run().unwrap();
    event_loop.run_ready();
    assert!(op.ok(), "connect failed: {}", op.mysql_error());
    op.release_connection().unwrap()
}

#[derive(Default)]
struct Recorded {
    events: Vec<String>,
    rows: Vec<String>,
}

/// Records every notification; optionally consumes rows, optionally
/// pauses on each rows-ready.
struct Recorder {
    state: Arc<Mutex<Recorded>>,
    consume_rows: bool,
    pause_on_rows: bool,
}

impl Recorder {
    fn new(consume_rows: bool, pause_on_rows: bool) -> (Box<Self>, Arc<Mutex<Recorded>>) {
        let state = Arc::new(Mutex::new(Recorded::default()));
        (
            Box::new(Self {
                state: Arc::clone(&state),
                consume_rows,
                pause_on_rows,
            }),
            state,
        )
    }
}

impl FetchCallbacks for Recorder {
    fn on_init_query(&mut self, op: &mut FetchContext<'_>) {
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("init:{}", op.num_current_query()));
    }

    fn on_rows_ready(&mut self, op: &mut FetchContext<'_>) {
        self.state.lock().unwrap().events.push("rows".to_string());
        if self.pause_on_rows {
            op.pause_for_consumer();
            return;
        }
        if self.consume_rows {
            if let Some(stream) = op.row_stream() {
                while let Some(row) = stream.consume_row() {
                    let text = row.text_at(0).unwrap_or("<null>").to_string();
                    self.state.lock().unwrap().rows.push(text);
                }
            }
        }
    }

    fn on_query_success(&mut self, op: &mut FetchContext<'_>, has_more_results: bool) {
        self.state.lock().unwrap().events.push(format!(
            "success:{}:{}",
            op.num_current_query(),
            has_more_results
        ));
    }

    fn on_failure(&mut self, _op: &mut FetchContext<'_>, result: OperationResult) {
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("failure:{result}"));
    }

    fn on_operation_completed(&mut self, _op: &mut FetchContext<'_>, result: OperationResult) {
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("completed:{result}"));
    }
}

#[test]
fn single_query_streams_rows_in_order() {
    let (client, handler, event_loop) = manual_client();
    handler.add_statement(TestStatement::with_rows(&["v"], &[&["1"], &["2"]]));

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    let (callbacks, recorded) = Recorder::new(true, false);
    let op = conn.begin_query("SELECT v FROM t", callbacks);
    op.run().unwrap();
    event_loop.run_ready();

    assert_eq!(op.result(), OperationResult::Succeeded);
    let recorded = recorded.lock().unwrap();
    assert_eq!(
        recorded.events,
        vec![
            "init:1",
            "rows",
            "rows",
            "success:1:false",
            "completed:Succeeded"
        ]
    );
    assert_eq!(recorded.rows, vec!["1", "2"]);
    assert_eq!(op.num_queries_executed().unwrap(), 1);
    assert!(op.result_size().unwrap() > 0);
}

#[test]
fn multi_statement_accounting() {
    let (client, handler, event_loop) = manual_client();
    handler.add_statement(
        TestStatement::with_rows(&["v"], &[&["1"]])
            .gtid("gtid-stmt-1")
            .resp_attr("read_only", "0"),
    );
    let mut update = TestStatement::no_rows(3);
    update.last_insert_id = 99;
    handler.add_statement(update);

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    let (callbacks, recorded) = Recorder::new(true, false);
    let op = conn.begin_multi_query(
        MultiQuery::new(vec![
            "SELECT v FROM t".to_string(),
            "UPDATE t SET v = 1".to_string(),
        ]),
        callbacks,
    );
    op.run().unwrap();
    event_loop.run_ready();

    assert_eq!(op.result(), OperationResult::Succeeded);
    let recorded = recorded.lock().unwrap();
    assert_eq!(
        recorded.events,
        vec![
            "init:1",
            "rows",
            "success:1:true",
            "init:2",
            "success:2:false",
            "completed:Succeeded"
        ]
    );
    assert_eq!(op.num_queries_executed().unwrap(), 2);
    // The completed operation exposes the last statement's results.
    assert_eq!(op.current_affected_rows().unwrap(), 3);
    assert_eq!(op.current_last_insert_id().unwrap(), 99);
    assert_eq!(op.current_recv_gtid().unwrap(), None);
}

#[test]
fn pause_resume_with_consumer_thread() {
    let (client, handler, event_loop) = manual_client();
    handler.add_statement(TestStatement::with_rows(&["v"], &[&["a1"], &["a2"]]));
    handler.add_statement(TestStatement::with_rows(&["v"], &[&["b1"]]));

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    let (callbacks, recorded) = Recorder::new(false, true);
    let op = conn.begin_multi_query(
        MultiQuery::new(vec!["SELECT 1".to_string(), "SELECT 2".to_string()]),
        callbacks,
    );
    op.run().unwrap();
    event_loop.run_ready();

    let mut consumed: Vec<String> = Vec::new();
    let mut rounds = 0;
    while op.state() != OperationState::Completed {
        rounds += 1;
        assert!(rounds < 20, "fetch did not converge");
        assert!(op.is_paused(), "machine should be parked for the consumer");
        assert!(op.is_stream_access_allowed());

        // While paused, no handler verb may be issued.
        let verbs_before = handler.verb_log().len();

        let consumer_op = Arc::clone(&op);
        let rows = std::thread::spawn(move || {
            let mut rows = Vec::new();
            consumer_op
                .with_row_stream(|stream| {
                    if let Some(stream) = stream {
                        while let Some(row) = stream.consume_row() {
                            rows.push(row.text_at(0).unwrap_or("<null>").to_string());
                        }
                    }
                })
                .unwrap();
            rows
        })
        .join()
        .unwrap();
        consumed.extend(rows);

        assert_eq!(handler.verb_log().len(), verbs_before);
        op.resume();
        event_loop.run_ready();
    }

    assert_eq!(op.result(), OperationResult::Succeeded);
    assert_eq!(consumed, vec!["a1", "a2", "b1"]);
    assert_eq!(op.num_queries_executed().unwrap(), 2);

    let recorded = recorded.lock().unwrap();
    let successes: Vec<&String> = recorded
        .events
        .iter()
        .filter(|e| e.starts_with("success:"))
        .collect();
    assert_eq!(successes, vec!["success:1:true", "success:2:false"]);
}

#[test]
fn cancel_mid_fetch_dispatches_kill() {
    let (client, handler, event_loop) = manual_client();
    handler.set_kill_supported(true);

    let mut statement = TestStatement::with_rows(&["v"], &[&["a1"]]);
    statement.rows.push_back(RowStep::Pending(IoInterest::Read));
    statement
        .rows
        .push_back(RowStep::Row(vec![Some(b"never-delivered".to_vec())]));
    handler.add_statement(statement);

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    let (callbacks, recorded) = Recorder::new(true, false);
    let op = conn.begin_query("SELECT v FROM big_table", callbacks);
    op.run().unwrap();
    event_loop.run_ready();
    assert_eq!(op.state(), OperationState::Pending);

    op.cancel();
    event_loop.run_ready();

    assert_eq!(op.result(), OperationResult::Cancelled);
    assert_eq!(handler.kill_count(), 1);

    let recorded = recorded.lock().unwrap();
    assert_eq!(
        recorded.events,
        vec!["init:1", "rows", "failure:Cancelled", "completed:Cancelled"]
    );
    assert_eq!(recorded.rows, vec!["a1"]);
    assert_eq!(op.num_queries_executed().unwrap(), 0);
}

#[test]
fn error_in_second_statement_terminates_fetch() {
    let (client, handler, event_loop) = manual_client();
    handler.add_statement(TestStatement::with_rows(&["v"], &[&["1"]]));
    handler.add_statement(TestStatement::with_rows(&["v"], &[&["2"]]));
    handler.script_next_result(vec![StepOutcome::error(1064, "You have an error in your SQL syntax")]);

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    let (callbacks, recorded) = Recorder::new(true, false);
    let op = conn.begin_multi_query(
        MultiQuery::new(vec!["SELECT 1".to_string(), "SELEC 2".to_string()]),
        callbacks,
    );
    op.run().unwrap();
    event_loop.run_ready();

    assert_eq!(op.result(), OperationResult::Failed);
    assert_eq!(op.mysql_errno(), 1064);
    assert_eq!(op.num_queries_executed().unwrap(), 1);

    let recorded = recorded.lock().unwrap();
    assert_eq!(
        recorded.events,
        vec![
            "init:1",
            "rows",
            "success:1:true",
            "failure:Failed",
            "completed:Failed"
        ]
    );
}

#[test]
fn query_timeout_dispatches_kill_when_enabled() {
    let (client, handler, event_loop) = manual_client();
    handler.set_kill_supported(true);
    handler.script_query(vec![StepOutcome::Pending(IoInterest::Read)]);

    let opts = ConnectionOptions::new().query_timeout(Duration::from_millis(50));
    let connect_op = client.begin_connection(test_key());
    connect_op.set_connection_options(&opts).unwrap();
    connect_op.set_kill_on_query_timeout(true).unwrap();
    connect_op.run().unwrap();
    event_loop.run_ready();
    let conn = connect_op.release_connection().unwrap();

    let (callbacks, recorded) = Recorder::new(true, false);
    let op = conn.begin_query("SELECT SLEEP(10)", callbacks);
    op.run().unwrap();
    event_loop.run_ready();
    assert_eq!(op.state(), OperationState::Pending);

    event_loop.advance(Duration::from_millis(50));
    assert_eq!(op.result(), OperationResult::TimedOut);
    assert_eq!(handler.kill_count(), 1);
    assert!(op.mysql_error().contains("Query timed out"));

    let recorded = recorded.lock().unwrap();
    assert_eq!(
        recorded.events,
        vec!["failure:TimedOut", "completed:TimedOut"]
    );
}

#[test]
fn accessor_state_guards() {
    let (client, handler, event_loop) = manual_client();
    handler.script_query(vec![StepOutcome::Pending(IoInterest::Read)]);

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    let (callbacks, _recorded) = Recorder::new(true, false);
    let op = conn.begin_query("SELECT 1", callbacks);

    // Unstarted: result size is not yet meaningful.
    assert!(matches!(op.result_size(), Err(Error::InvalidState(_))));

    op.run().unwrap();
    event_loop.run_ready();
    assert_eq!(op.state(), OperationState::Pending);

    // Pending: executed-statement count is not yet stable.
    assert!(matches!(
        op.num_queries_executed(),
        Err(Error::InvalidState(_))
    ));
    // Stream state is not reachable from a foreign thread while running.
    assert!(!op.is_stream_access_allowed());
    assert!(matches!(
        op.current_affected_rows(),
        Err(Error::InvalidState(_))
    ));

    op.cancel();
    event_loop.run_ready();
    assert_eq!(op.result(), OperationResult::Cancelled);
    assert_eq!(op.num_queries_executed().unwrap(), 0);
    assert!(op.result_size().is_ok());
}

#[test]
fn unconsumed_rows_are_discarded() {
    let (client, handler, event_loop) = manual_client();
    handler.add_statement(TestStatement::with_rows(&["v"], &[&["1"], &["2"]]));

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    // Neither consumes nor pauses.
    let (callbacks, recorded) = Recorder::new(false, false);
    let op = conn.begin_query("SELECT v FROM t", callbacks);
    op.run().unwrap();
    event_loop.run_ready();

    assert_eq!(op.result(), OperationResult::Succeeded);
    let recorded = recorded.lock().unwrap();
    assert!(recorded.rows.is_empty());
    assert_eq!(
        recorded.events,
        vec![
            "init:1",
            "rows",
            "rows",
            "success:1:false",
            "completed:Succeeded"
        ]
    );
}

#[test]
fn statement_without_rows_skips_rows_ready() {
    let (client, handler, event_loop) = manual_client();
    handler.add_statement(TestStatement::no_rows(7));

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    let (callbacks, recorded) = Recorder::new(true, false);
    let op = conn.begin_query("DELETE FROM t", callbacks);
    op.run().unwrap();
    event_loop.run_ready();

    assert_eq!(op.result(), OperationResult::Succeeded);
    assert_eq!(op.current_affected_rows().unwrap(), 7);
    let recorded = recorded.lock().unwrap();
    assert_eq!(
        recorded.events,
        vec!["init:1", "success:1:false", "completed:Succeeded"]
    );
}

#[test]
fn pending_rows_resume_on_readiness() {
    let (client, handler, event_loop) = manual_client();
    let mut statement = TestStatement::with_rows(&["v"], &[&["1"]]);
    statement.rows.push_front(RowStep::Pending(IoInterest::Read));
    handler.add_statement(statement);

    let conn = connect(&client, &event_loop, &ConnectionOptions::new());
    let (callbacks, recorded) = Recorder::new(true, false);
    let op = conn.begin_query("SELECT v FROM t", callbacks);
    op.run().unwrap();
    event_loop.run_ready();
    assert_eq!(op.state(), OperationState::Pending);
    assert_eq!(event_loop.watched_fds(), vec![11]);

    event_loop.trigger_fd(11);
    assert_eq!(op.result(), OperationResult::Succeeded);
    assert_eq!(recorded.lock().unwrap().rows, vec!["1"]);
}
