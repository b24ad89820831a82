//! End-to-end pipeline scenarios against a stub upstream.

use agentchaos_config::Settings;
use agentchaos_core::{Flow, FlowRequest};
use agentchaos_proxy::{ChaosPipeline, ChaosProxy, ProxyConfig, ProxyMode};
use agentchaos_security::AuthConfig;
use http::Method;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TAPE_KEY: &str = "0123456789abcdef0123456789abcdef";

fn settings_for(dir: &Path, tape_key: Option<&str>) -> Settings {
    Settings {
        // Plans in these tests carry no rule packs; strict classification
        // would force everything to UNKNOWN.
        classifier_strict: false,
        tape_key: tape_key.map(str::to_owned),
        log_file: Some(dir.join("logs/proxy.log")),
        audit_log: dir.join("logs/audit.log"),
        runs_dir: dir.join("runs"),
        ..Settings::default()
    }
}

fn write_plan(dir: &Path, contents: &str) -> PathBuf {
    let plan_path = dir.join("plan.yaml");
    std::fs::write(&plan_path, contents).unwrap();
    plan_path
}

async fn live_proxy(dir: &Path, plan: &str) -> ChaosProxy {
    let plan_path = write_plan(dir, plan);
    let pipeline = ChaosPipeline::new(ProxyConfig {
        mode: ProxyMode::Live,
        plan_path: Some(plan_path),
        tape_path: None,
        settings: settings_for(dir, None),
        auth: AuthConfig::default(),
    })
    .await
    .unwrap();
    ChaosProxy::new(Arc::new(pipeline))
}

fn json_flow(url: &str, body: serde_json::Value) -> Flow {
    let mut request = FlowRequest::new(Method::POST, url);
    request.set_header("Content-Type", "application/json");
    request.set_json(&body);
    Flow::new(request)
}

#[tokio::test]
async fn test_latency_on_tool_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search_flights"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"flights":["AC101"]}"#),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let proxy = live_proxy(
        dir.path(),
        r#"
classifier_rules:
  tool_patterns: [".*/search_flights"]
targets:
  - name: api
    type: http_endpoint
    pattern: ".*/search_flights"
scenarios:
  - name: delay
    type: latency
    target_ref: api
    params:
      delay: 0.1
"#,
    )
    .await;

    let mut flow = json_flow(
        &format!("{}/search_flights", server.uri()),
        serde_json::json!({"origin": "JFK", "destination": "LAX"}),
    );

    let start = Instant::now();
    proxy.handle_flow(&mut flow).await;
    assert!(start.elapsed() >= Duration::from_millis(100), "request must be held >= 100ms");

    // Original response returned unchanged
    let response = flow.response.as_ref().unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, br#"{"flights":["AC101"]}"#);
    assert_eq!(flow.metadata.applied_strategies, vec!["delay"]);

    // Structured log line carries the applied strategy
    proxy.pipeline().shutdown().await.unwrap();
    let log = std::fs::read_to_string(dir.path().join("logs/proxy.log")).unwrap();
    let entry: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
    assert_eq!(entry["chaos_applied"], "delay");
    assert_eq!(entry["tool_name"], "search_flights");
    assert_eq!(entry["traffic_type"], "TOOL_CALL");
}

#[tokio::test]
async fn test_error_injection_on_llm() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"choices":[]}"#),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let proxy = live_proxy(
        dir.path(),
        r#"
targets:
  - name: llm
    type: http_endpoint
    pattern: ".*/v1/chat/completions"
scenarios:
  - name: err
    type: error
    target_ref: llm
    params:
      error_code: 503
"#,
    )
    .await;

    let mut flow = json_flow(
        &format!("{}/v1/chat/completions", server.uri()),
        serde_json::json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]}),
    );
    proxy.handle_flow(&mut flow).await;

    let response = flow.response.as_ref().unwrap();
    assert_eq!(response.status_code, 503);
    assert_eq!(response.reason, "Service Unavailable");
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "Chaos injection: Simulated server error");
    assert_eq!(body["code"], 503);
    assert_eq!(body["type"], "chaos_engineering");
}

#[tokio::test]
async fn test_phantom_document_overwrite_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                r#"{"matches":[{"metadata":{"text":"The capital of France is Paris."}},{"metadata":{"text":"Python is a programming language."}}]}"#,
                "application/json",
            ),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let proxy = live_proxy(
        dir.path(),
        r#"
targets:
  - name: search
    type: http_endpoint
    pattern: ".*/query"
scenarios:
  - name: phantom
    type: phantom_document
    target_ref: search
    probability: 1.0
    params:
      target_json_path: "$.matches[*].metadata.text"
      mode: overwrite
      misinformation_source: ["FAKE: The Earth is flat."]
"#,
    )
    .await;

    let mut flow = json_flow(&format!("{}/query", server.uri()), serde_json::json!({"q": "france"}));
    proxy.handle_flow(&mut flow).await;

    let response = flow.response.as_ref().unwrap();
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["matches"][0]["metadata"]["text"], "FAKE: The Earth is flat.");
    assert_eq!(body["matches"][1]["metadata"]["text"], "FAKE: The Earth is flat.");
    assert_eq!(
        response.header("content-length"),
        Some(response.body.len().to_string()).as_deref()
    );
}

#[tokio::test]
async fn test_schema_fuzzing_mutates_forwarded_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search_flights"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let proxy = live_proxy(
        dir.path(),
        r#"
targets:
  - name: flights
    type: tool_call
    pattern: "/search_flights"
scenarios:
  - name: fuzz
    type: mcp_fuzzing
    target_ref: flights
    params:
      fuzz_type: schema_violation
      field_mode:
        date: invalid_format
        numeric: type_mismatch
        string: empty
"#,
    )
    .await;

    let mut flow = json_flow(
        &format!("{}/search_flights", server.uri()),
        serde_json::json!({"origin": "NYC", "destination": "LAX", "date": "2025-12-25", "passengers": 2}),
    );
    proxy.handle_flow(&mut flow).await;

    // The upstream saw the fuzzed body, not the original one
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["passengers"], "2abc");
    assert_ne!(body["date"], "2025-12-25");
    assert_eq!(flow.metadata.applied_strategies, vec!["fuzz"]);
}

#[tokio::test]
async fn test_record_then_replay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"ok":true}"#),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let tape_path = dir.path().join("session.tape");
    let url = format!("{}/api", server.uri());

    // RECORD session
    {
        let record_dir = dir.path().join("record");
        std::fs::create_dir_all(&record_dir).unwrap();
        let pipeline = ChaosPipeline::new(ProxyConfig {
            mode: ProxyMode::Record,
            plan_path: None,
            tape_path: Some(tape_path.clone()),
            settings: settings_for(&record_dir, Some(TAPE_KEY)),
            auth: AuthConfig::default(),
        })
        .await
        .unwrap();
        let proxy = ChaosProxy::new(Arc::new(pipeline));

        let mut flow = json_flow(&url, serde_json::json!({"a": 1, "b": 2}));
        proxy.handle_flow(&mut flow).await;
        assert_eq!(flow.response.as_ref().unwrap().status_code, 200);

        proxy.pipeline().shutdown().await.unwrap();
        assert!(tape_path.exists());
    }

    // PLAYBACK session: keys reordered, exact fingerprint match, no network
    {
        let playback_dir = dir.path().join("playback");
        std::fs::create_dir_all(&playback_dir).unwrap();
        let pipeline = ChaosPipeline::new(ProxyConfig {
            mode: ProxyMode::Playback,
            plan_path: None,
            tape_path: Some(tape_path.clone()),
            settings: settings_for(&playback_dir, Some(TAPE_KEY)),
            auth: AuthConfig::default(),
        })
        .await
        .unwrap();
        let proxy = ChaosProxy::new(Arc::new(pipeline));

        server.reset().await;

        let mut flow = json_flow(&url, serde_json::json!({"b": 2, "a": 1}));
        proxy.handle_flow(&mut flow).await;

        let response = flow.response.as_ref().unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, br#"{"ok":true}"#);
        assert!(flow.metadata.from_playback);

        // No network call was performed
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_playback_miss_returns_synthetic_404() {
    let dir = tempfile::tempdir().unwrap();
    let tape_path = dir.path().join("session.tape");

    // Record an unrelated interaction so the tape exists
    {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/known"))
            .respond_with(ResponseTemplate::new(200).set_body_string("known"))
            .mount(&server)
            .await;

        let pipeline = ChaosPipeline::new(ProxyConfig {
            mode: ProxyMode::Record,
            plan_path: None,
            tape_path: Some(tape_path.clone()),
            settings: settings_for(dir.path(), Some(TAPE_KEY)),
            auth: AuthConfig::default(),
        })
        .await
        .unwrap();
        let proxy = ChaosProxy::new(Arc::new(pipeline));
        let mut flow = Flow::new(FlowRequest::new(Method::GET, format!("{}/known", server.uri())));
        proxy.handle_flow(&mut flow).await;
        proxy.pipeline().shutdown().await.unwrap();
    }

    let pipeline = ChaosPipeline::new(ProxyConfig {
        mode: ProxyMode::Playback,
        plan_path: None,
        tape_path: Some(tape_path),
        settings: settings_for(dir.path(), Some(TAPE_KEY)),
        auth: AuthConfig::default(),
    })
    .await
    .unwrap();
    let proxy = ChaosProxy::new(Arc::new(pipeline));

    let mut flow = Flow::new(FlowRequest::new(Method::GET, "http://nowhere.example/unknown"));
    proxy.handle_flow(&mut flow).await;

    let response = flow.response.as_ref().unwrap();
    assert_eq!(response.status_code, 404);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "No matching entry in tape");
}

#[tokio::test]
async fn test_record_mode_without_key_fails_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let result = ChaosPipeline::new(ProxyConfig {
        mode: ProxyMode::Record,
        plan_path: None,
        tape_path: Some(dir.path().join("t.tape")),
        settings: settings_for(dir.path(), None),
        auth: AuthConfig::default(),
    })
    .await;
    assert!(result.is_err(), "RECORD without CHAOS_TAPE_KEY must fail to start");
}

#[tokio::test]
async fn test_auth_denial_returns_401_and_audits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let pipeline = ChaosPipeline::new(ProxyConfig {
        mode: ProxyMode::Live,
        plan_path: None,
        tape_path: None,
        settings: settings_for(dir.path(), None),
        auth: AuthConfig {
            read_keys: vec!["reader-1".into()],
            ..Default::default()
        },
    })
    .await
    .unwrap();
    let proxy = ChaosProxy::new(Arc::new(pipeline));

    // No token: denied, upstream untouched
    let mut flow = json_flow(&format!("{}/x", server.uri()), serde_json::json!({}));
    proxy.handle_flow(&mut flow).await;
    assert_eq!(flow.response.as_ref().unwrap().status_code, 401);
    assert!(flow.metadata.aborted);
    assert!(server.received_requests().await.unwrap().is_empty());

    let audit = std::fs::read_to_string(dir.path().join("logs/audit.log")).unwrap();
    assert!(audit.contains("Action=AUTH"));
    assert!(audit.contains("Outcome=denied"));

    // With token: allowed
    let mut flow = json_flow(&format!("{}/x", server.uri()), serde_json::json!({}));
    flow.request.set_header("X-Chaos-Token", "reader-1");
    proxy.handle_flow(&mut flow).await;
    assert_eq!(flow.response.as_ref().unwrap().status_code, 200);
}

#[tokio::test]
async fn test_failing_strategy_fails_open() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"intact":true}"#),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    // group_chaos without target_role fails construction and is skipped
    // entirely; phantom with an unmatched path skips at runtime. Either way
    // the client sees the real response.
    let proxy = live_proxy(
        dir.path(),
        r#"
targets:
  - name: everything
    type: http_endpoint
    pattern: ".*"
scenarios:
  - name: broken
    type: group_chaos
    target_ref: everything
  - name: miss
    type: phantom_document
    target_ref: everything
    params:
      target_json_path: "$.not.there[*]"
"#,
    )
    .await;

    let mut flow = json_flow(&format!("{}/anything", server.uri()), serde_json::json!({"q": 1}));
    proxy.handle_flow(&mut flow).await;

    let response = flow.response.as_ref().unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, br#"{"intact":true}"#);
    assert!(flow.metadata.applied_strategies.is_empty());
}

#[tokio::test]
async fn test_hot_reload_swaps_strategies_atomically() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string("{}"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let plan_v1 = r#"
revision: 1
targets:
  - name: api
    type: http_endpoint
    pattern: ".*"
scenarios:
  - name: err-v1
    type: error
    target_ref: api
    params:
      error_code: 503
"#;
    let plan_v2 = r#"
revision: 2
targets:
  - name: api
    type: http_endpoint
    pattern: ".*"
scenarios:
  - name: err-v2
    type: error
    target_ref: api
    params:
      error_code: 429
"#;

    let proxy = live_proxy(dir.path(), plan_v1).await;
    let url = format!("{}/x", server.uri());

    let mut flow = json_flow(&url, serde_json::json!({}));
    proxy.handle_flow(&mut flow).await;
    assert_eq!(flow.metadata.applied_strategies, vec!["err-v1"]);
    assert_eq!(flow.response.as_ref().unwrap().status_code, 503);

    write_plan(dir.path(), plan_v2);

    let mut flow = json_flow(&url, serde_json::json!({}));
    proxy.handle_flow(&mut flow).await;
    // Applied strategies come entirely from the new plan revision
    assert_eq!(flow.metadata.applied_strategies, vec!["err-v2"]);
    assert_eq!(flow.response.as_ref().unwrap().status_code, 429);
}
