use std::time::{Duration, Instant};

use httptest::matchers::{all_of, contains, eq, json_decoded, request};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;

use lead_console::{
    to_delimited, AppConfig, AppError, AppState, BatchDraft, BatchOutcome, BatchRequest,
    Reachability, RunOptions, SubmissionCoordinator,
};

const WEBHOOK_PATH: &str = "/webhook/lead-generation";

fn test_config(data_dir: &TempDir, endpoint_url: String) -> AppConfig {
    AppConfig {
        endpoint_url,
        workflow_timeout_ms: 5_000,
        probe_timeout_ms: 1_000,
        profile_marker: "/in/".into(),
        data_dir: data_dir.path().to_path_buf(),
        journal_enabled: true,
        journal_buffer_max_bytes: 1024 * 1024,
        journal_buffer_max_files: 2,
        export_file_stem: "leads".into(),
    }
}

fn closed_port_url() -> String {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    format!("http://127.0.0.1:{port}{WEBHOOK_PATH}")
}

#[tokio::test]
async fn scenario_a_validates_submits_and_summarizes() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of!(
            request::method_path("POST", WEBHOOK_PATH),
            request::headers(contains(("content-type", "application/json"))),
            request::body(json_decoded(eq(json!({
                "urls": ["https://site.com/in/a", "https://site.com/in/b"]
            }))))
        ))
        .respond_with(json_encoded(json!([
            {"name": "A", "email": "a@x.com"},
            {"name": "B"}
        ]))),
    );

    let dir = tempdir().unwrap();
    let config = test_config(&dir, server.url(WEBHOOK_PATH).to_string());
    let state = AppState::initialize(config).expect("state");
    let options = RunOptions::from_config(state.config());
    let draft = BatchDraft::new("https://site.com/in/a\nnotaurl\nhttps://site.com/in/b");

    let report = state
        .run_batch(&draft, &options, None)
        .await
        .expect("batch report");

    assert_eq!(report.validation.submitted, 2);
    assert_eq!(report.validation.skipped, vec!["notaurl"]);
    assert_eq!(report.result.records.len(), 2);
    assert_eq!(report.result.outcome, BatchOutcome::Success);
    assert_eq!(report.summary.lead_count, 2);
    assert_eq!(report.summary.emails_found, 1);
    assert!(report.message().contains("Skipped 1 invalid line"));

    let csv = String::from_utf8(to_delimited(&report.result.records).unwrap()).unwrap();
    assert_eq!(csv, "name,email\nA,a@x.com\nB,\n");

    let journal = std::fs::read_to_string(state.journal().buffer_path()).unwrap();
    assert!(journal.contains("batch_submitted"));
    assert!(journal.contains("batch_completed"));
    assert!(!journal.contains("site.com/in/a"));
}

#[tokio::test]
async fn scenario_b_server_error_is_classified_without_retry() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", WEBHOOK_PATH))
            .times(1)
            .respond_with(status_code(500).body("internal error")),
    );

    let dir = tempdir().unwrap();
    let state =
        AppState::initialize(test_config(&dir, server.url(WEBHOOK_PATH).to_string())).unwrap();
    let options = RunOptions::from_config(state.config());

    let result = state
        .run_batch(&BatchDraft::new("https://site.com/in/a"), &options, None)
        .await;
    match result {
        Err(AppError::Server { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "internal error");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let journal = std::fs::read_to_string(state.journal().buffer_path()).unwrap();
    assert!(journal.contains("batch_failed"));
}

#[tokio::test]
async fn non_json_success_body_is_malformed() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", WEBHOOK_PATH))
            .respond_with(status_code(200).body("Workflow was started")),
    );

    let coordinator = SubmissionCoordinator::new(reqwest::Client::new());
    let batch = BatchRequest::new(["https://site.com/in/a"]).unwrap();
    let result = coordinator
        .submit(&batch, &server.url(WEBHOOK_PATH).to_string(), 5_000, None)
        .await;
    match result {
        Err(AppError::MalformedResponse { body, .. }) => assert_eq!(body, "Workflow was started"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn wrapped_response_is_unwrapped() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("POST", WEBHOOK_PATH)).respond_with(
            json_encoded(json!({
                "data": [{"name": "A", "company": "Acme"}, {"name": "B", "company": "Acme"}]
            })),
        ),
    );

    let coordinator = SubmissionCoordinator::new(reqwest::Client::new());
    let batch = BatchRequest::new(["https://site.com/in/a", "https://site.com/in/b"]).unwrap();
    let result = coordinator
        .submit(&batch, &server.url(WEBHOOK_PATH).to_string(), 5_000, None)
        .await
        .expect("batch result");
    assert_eq!(result.records.len(), 2);
    assert_eq!(lead_console::summarize(&result.records).distinct_companies, 1);
}

#[tokio::test]
async fn silent_endpoint_times_out_within_deadline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let holder = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let coordinator = SubmissionCoordinator::new(reqwest::Client::new());
    let batch = BatchRequest::new(["https://site.com/in/a"]).unwrap();
    let started = Instant::now();
    let result = coordinator
        .submit(&batch, &format!("http://{addr}{WEBHOOK_PATH}"), 300, None)
        .await;
    let elapsed = started.elapsed();
    holder.abort();

    assert!(
        matches!(result, Err(AppError::Timeout { timeout_ms: 300 })),
        "unexpected result: {result:?}"
    );
    assert!(elapsed < Duration::from_millis(300) + Duration::from_secs(2));
}

#[tokio::test]
async fn refused_connection_is_a_connection_error() {
    let coordinator = SubmissionCoordinator::new(reqwest::Client::new());
    let batch = BatchRequest::new(["https://site.com/in/a"]).unwrap();
    let result = coordinator
        .submit(&batch, &closed_port_url(), 2_000, None)
        .await;
    assert!(
        matches!(result, Err(AppError::Connection(_))),
        "unexpected result: {result:?}"
    );
}

#[tokio::test]
async fn blank_draft_is_rejected_before_any_call() {
    let dir = tempdir().unwrap();
    let state = AppState::initialize(test_config(&dir, closed_port_url())).unwrap();
    let options = RunOptions::from_config(state.config());
    match state
        .run_batch(&BatchDraft::new(" \n\t\n"), &options, None)
        .await
    {
        Err(AppError::ValidationEmpty { invalid }) => assert!(invalid.is_empty()),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn probe_treats_any_status_as_reachable() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/"))
            .times(2)
            .respond_with(status_code(404)),
    );

    let dir = tempdir().unwrap();
    let state =
        AppState::initialize(test_config(&dir, server.url(WEBHOOK_PATH).to_string())).unwrap();
    assert_eq!(state.probe().await, Reachability::Reachable { status: 404 });

    let unreachable = state.probe_endpoint(&closed_port_url()).await;
    assert!(!unreachable.is_reachable());

    let health = state.console_health().await;
    assert!(health.endpoint.is_reachable());
}
