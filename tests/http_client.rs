//! HTTP client tests using wiremock mock server.
//!
//! These tests verify:
//! - Request bodies and headers for run, stream-run and resume
//! - Double-encoded run responses
//! - Error handling for non-success statuses
//! - Event streams decoded from server-sent frames

mod common;

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use workflow_client::{
    Client, Config, Error, HttpRequestMetrics, MetricsCallbacks, RequestOptions,
    StreamFirstEventMetrics, TransportErrorKind, WorkflowEventKind,
};

use common::{client_for, start_truncated_response_server};

const TWO_MESSAGES: &str = "id: 0\nevent: Message\ndata: {\"content\":\"Hello\",\"node_title\":\"End\",\"node_seq_id\":\"0\",\"node_is_finish\":false,\"cost\":\"0\"}\n\nid: 1\nevent: Message\ndata: {\"content\":\"World\",\"node_title\":\"End\",\"node_seq_id\":\"1\",\"node_is_finish\":true,\"cost\":\"0\"}\n\n";

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

#[derive(Debug, Deserialize, PartialEq)]
struct Output {
    result: String,
}

#[tokio::test]
async fn run_sends_request_and_decodes_double_encoded_data() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/workflow/run"))
        .and(header("authorization", "Bearer pat_test"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "workflow_id": "wf_123",
            "app_id": "app_9",
            "parameters": { "input": "hello" }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Tt-Logid", "log-1")
                .set_body_json(json!({
                    "code": 200,
                    "data": "{\"result\":\"success\"}",
                    "msg": "Success"
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(server.uri());
    let resp = client
        .workflows()
        .run::<_, Output>(&json!({ "input": "hello" }))
        .await
        .expect("run should succeed");

    assert_eq!(resp.code, 200);
    assert_eq!(resp.msg, "Success");
    assert_eq!(
        resp.data,
        Some(Output {
            result: "success".into()
        })
    );
    assert_eq!(resp.request_id.as_deref(), Some("log-1"));
}

#[tokio::test]
async fn run_accepts_typed_parameters() {
    #[derive(serde::Serialize)]
    struct Params<'a> {
        city: &'a str,
        days: u8,
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/run"))
        .and(body_json(json!({
            "workflow_id": "wf_123",
            "app_id": "app_9",
            "parameters": { "city": "Paris", "days": 3 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "msg": "" })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = client_for(server.uri())
        .workflows()
        .run::<_, Value>(&Params {
            city: "Paris",
            days: 3,
        })
        .await
        .expect("run should succeed");
    assert!(resp.is_success());
    assert!(resp.data.is_none());
}

#[tokio::test]
async fn null_parameters_fail_without_network_call() {
    let server = MockServer::start().await;
    let client = client_for(server.uri());

    let err = client
        .workflows()
        .run::<_, Value>(&Value::Null)
        .await
        .expect_err("null parameters must be rejected");
    assert!(matches!(err, Error::Validation(_)));

    let err = client
        .workflows()
        .run_stream(&Value::Null)
        .await
        .err()
        .expect("null parameters must be rejected");
    assert!(matches!(err, Error::Validation(_)));

    let err = client
        .workflows()
        .resume("", "yes", 1)
        .await
        .err()
        .expect("empty event id must be rejected");
    assert!(matches!(err, Error::Validation(_)));

    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn non_success_status_returns_api_error_with_body() {
    let server = MockServer::start().await;
    let body = r#"{"code":4000,"msg":"workflow not found"}"#;

    for endpoint in [
        "/v1/workflow/run",
        "/v1/workflow/stream_run",
        "/v1/workflow/stream_resume",
    ] {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(404).set_body_raw(body, "application/json"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let workflows = client_for(server.uri()).workflows();
    let errors = vec![
        workflows
            .run::<_, Value>(&json!({}))
            .await
            .expect_err("run should fail"),
        workflows
            .run_stream(&json!({}))
            .await
            .err()
            .expect("stream should fail"),
        workflows
            .resume("evt_1", "yes", 1)
            .await
            .err()
            .expect("resume should fail"),
    ];

    for err in errors {
        match err {
            Error::Api(api) => {
                assert_eq!(api.status, 404);
                assert_eq!(api.code.as_deref(), Some("4000"));
                assert_eq!(api.message, "workflow not found");
                assert_eq!(api.body(), body);
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn error_body_cut_off_mid_read_is_a_transport_error() {
    let base_url =
        start_truncated_response_server("500 Internal Server Error", r#"{"code":5000,"#).await;

    let err = client_for(base_url)
        .workflows()
        .run::<_, Value>(&json!({ "input": "x" }))
        .await
        .expect_err("run should fail");

    match err {
        Error::Transport(te) => {
            assert_eq!(te.kind, TransportErrorKind::Body);
            assert!(te.source.is_some());
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn run_timeout_comes_from_options_then_client_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/run"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": 0, "msg": "Success", "data": "{}" }))
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let per_call = client_for(server.uri())
        .workflows()
        .run_with_options::<_, Value>(
            &json!({}),
            RequestOptions::default().with_timeout(std::time::Duration::from_millis(50)),
        )
        .await
        .expect_err("per-call timeout should fire");

    let client_wide = Client::new(Config {
        base_url: Some(server.uri()),
        access_token: Some("pat_test".into()),
        workflow_id: Some("wf_123".into()),
        timeout: Some(std::time::Duration::from_millis(50)),
        ..Default::default()
    })
    .expect("client creation should succeed")
    .workflows()
    .run::<_, Value>(&json!({}))
    .await
    .expect_err("client timeout should fire");

    for err in [per_call, client_wide] {
        match err {
            Error::Transport(te) => assert_eq!(te.kind, TransportErrorKind::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn plain_text_error_body_is_kept_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/run"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway\n"))
        .mount(&server)
        .await;

    let err = client_for(server.uri())
        .workflows()
        .run::<_, Value>(&json!({ "q": 1 }))
        .await
        .expect_err("run should fail");
    assert_eq!(err.status(), Some(502));
    match err {
        Error::Api(api) => assert_eq!(api.body(), "bad gateway\n"),
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_run_data_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": "{not json"
        })))
        .mount(&server)
        .await;

    let err = client_for(server.uri())
        .workflows()
        .run::<_, Value>(&json!({ "q": 1 }))
        .await
        .expect_err("decode should fail");
    assert!(matches!(err, Error::Decode { .. }));
}

#[tokio::test]
async fn run_stream_yields_messages_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/stream_run"))
        .and(header("accept", "text/event-stream"))
        .and(header("authorization", "Bearer pat_test"))
        .and(body_json(json!({
            "workflow_id": "wf_123",
            "app_id": "app_9",
            "parameters": { "input": "hi" }
        })))
        .respond_with(sse(TWO_MESSAGES))
        .expect(1)
        .mount(&server)
        .await;

    let stream = client_for(server.uri())
        .workflows()
        .run_stream(&json!({ "input": "hi" }))
        .await
        .expect("stream should open");

    let events: Vec<_> = stream
        .map(|item| item.expect("event should decode"))
        .collect()
        .await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, 0);
    assert_eq!(events[0].kind, WorkflowEventKind::Message);
    assert_eq!(events[0].message().unwrap().content, "Hello");
    assert!(!events[0].message().unwrap().node_is_finish);
    assert_eq!(events[1].id, 1);
    assert_eq!(events[1].message().unwrap().content, "World");
    assert!(events[1].message().unwrap().node_is_finish);
}

#[tokio::test]
async fn interrupt_then_resume_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/stream_run"))
        .respond_with(sse(
            "id: 0\nevent: Message\ndata: {\"content\":\"Which city?\"}\n\n\
             id: 1\nevent: Interrupt\ndata: {\"interrupt_data\":{\"event_id\":\"evt_7\",\"type\":2},\"node_title\":\"Question\"}",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/stream_resume"))
        .and(body_json(json!({
            "event_id": "evt_7",
            "workflow_id": "wf_123",
            "resume_data": "Paris",
            "interrupt_type": 2
        })))
        .respond_with(sse(
            "id: 0\nevent: Message\ndata: {\"content\":\"Sunny in Paris\",\"node_is_finish\":true}\n\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let workflows = client_for(server.uri()).workflows();
    let first = workflows
        .run_stream(&json!({ "input": "weather" }))
        .await
        .expect("stream should open")
        .collect()
        .await
        .expect("stream should drain");
    assert_eq!(first.content, "Which city?");
    let interrupt = first.interrupt.expect("run should pause");
    assert_eq!(interrupt.interrupt_data.event_id, "evt_7");
    assert_eq!(interrupt.interrupt_data.interrupt_type, 2);
    assert_eq!(interrupt.node_title, "Question");

    let resumed = workflows
        .resume_interrupt(&interrupt, "Paris")
        .await
        .expect("resume should open")
        .collect()
        .await
        .expect("resume should drain");
    assert_eq!(resumed.content, "Sunny in Paris");
    assert!(resumed.interrupt.is_none());
}

#[tokio::test]
async fn error_event_is_delivered_as_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/stream_run"))
        .respond_with(sse(
            "id: 0\nevent: Error\ndata: {\"error_code\":720701013,\"error_message\":\"node failed\"}\n\n",
        ))
        .mount(&server)
        .await;

    let mut stream = client_for(server.uri())
        .workflows()
        .run_stream(&json!({ "input": "x" }))
        .await
        .expect("stream should open");
    let event = stream.next().await.expect("one event").expect("decodes");
    let error = event.error().expect("error payload");
    assert_eq!(error.error_code, 720701013);
    assert_eq!(error.error_message, "node failed");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn malformed_frame_ends_stream_with_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/stream_run"))
        .respond_with(sse(
            "id: 0\nevent: Message\ndata: {\"content\":\"ok\"}\n\nid: 1\nevent: Message\ndata: nope\n\nid: 2\nevent: Message\ndata: {\"content\":\"late\"}\n\n",
        ))
        .mount(&server)
        .await;

    let mut stream = client_for(server.uri())
        .workflows()
        .run_stream(&json!({ "input": "x" }))
        .await
        .expect("stream should open");
    assert!(stream.next().await.unwrap().is_ok());
    match stream.next().await {
        Some(Err(Error::Decode { raw_data, .. })) => assert_eq!(raw_data.as_deref(), Some("nope")),
        other => panic!("expected decode error, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn json_answer_on_stream_endpoint_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/stream_run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 4100,
            "msg": "authentication is invalid"
        })))
        .mount(&server)
        .await;

    let err = client_for(server.uri())
        .workflows()
        .run_stream(&json!({ "input": "x" }))
        .await
        .err()
        .expect("stream should not open");
    match err {
        Error::Api(api) => {
            assert_eq!(api.status, 200);
            assert_eq!(api.code.as_deref(), Some("4100"));
            assert_eq!(api.message, "authentication is invalid");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn request_options_and_default_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/stream_run"))
        .and(header("x-request-id", "req-abc"))
        .and(header("x-tenant", "acme"))
        .and(header("x-trace", "on"))
        .respond_with(sse(TWO_MESSAGES).insert_header("X-Request-Id", "req-abc"))
        .expect(1)
        .mount(&server)
        .await;

    let mut defaults = workflow_client::HeaderList::new();
    defaults.push(workflow_client::HeaderEntry::new(
        "X-Tenant".into(),
        "acme".into(),
    ));
    let client = Client::new(Config {
        base_url: Some(server.uri()),
        access_token: Some("pat_test".into()),
        workflow_id: Some("wf_123".into()),
        default_headers: Some(defaults),
        ..Default::default()
    })
    .expect("client");

    let stream = client
        .workflows()
        .run_stream_with_options(
            &json!({ "input": "x" }),
            RequestOptions::default()
                .with_request_id("req-abc")
                .with_header("X-Trace", "on"),
        )
        .await
        .expect("stream should open");
    assert_eq!(stream.request_id(), Some("req-abc"));
}

#[tokio::test]
async fn metrics_callbacks_observe_requests_and_first_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/stream_run"))
        .respond_with(sse(TWO_MESSAGES))
        .mount(&server)
        .await;

    let http_calls: Arc<Mutex<Vec<HttpRequestMetrics>>> = Arc::default();
    let first_events: Arc<Mutex<Vec<StreamFirstEventMetrics>>> = Arc::default();
    let metrics = MetricsCallbacks {
        http_request: Some({
            let calls = http_calls.clone();
            Arc::new(move |m: HttpRequestMetrics| calls.lock().unwrap().push(m))
        }),
        stream_first_event: Some({
            let calls = first_events.clone();
            Arc::new(move |m: StreamFirstEventMetrics| calls.lock().unwrap().push(m))
        }),
    };
    let client = Client::new(Config {
        base_url: Some(server.uri()),
        access_token: Some("pat_test".into()),
        workflow_id: Some("wf_123".into()),
        metrics: Some(metrics),
        ..Default::default()
    })
    .expect("client");

    let outcome = client
        .workflows()
        .run_stream(&json!({ "input": "x" }))
        .await
        .expect("stream should open")
        .collect()
        .await
        .expect("drain");
    assert_eq!(outcome.content, "HelloWorld");

    let http_calls = http_calls.lock().unwrap();
    assert_eq!(http_calls.len(), 1);
    assert_eq!(http_calls[0].status, Some(200));
    assert_eq!(http_calls[0].context.path, "/v1/workflow/stream_run");
    assert_eq!(http_calls[0].context.workflow_id.as_deref(), Some("wf_123"));

    let first_events = first_events.lock().unwrap();
    assert_eq!(first_events.len(), 1);
    assert!(first_events[0].error.is_none());
}

#[tokio::test]
async fn missing_credentials_fail_construction() {
    let err = Client::new(Config {
        workflow_id: Some("wf".into()),
        ..Default::default()
    })
    .err()
    .expect("token is required");
    assert!(matches!(err, Error::Config(_)));

    let err = Client::new(Config {
        access_token: Some("pat".into()),
        ..Default::default()
    })
    .err()
    .expect("workflow id is required");
    assert!(matches!(err, Error::Config(_)));
}
