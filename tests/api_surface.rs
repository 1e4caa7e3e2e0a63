//! Router-level tests for the HTTP surface.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use switchyard::server;

async fn test_router() -> (Router, server::AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let workflow = json!({
        "nodes": [{"id": "a", "type": "TextInputNode", "input_values": {"text": "hi"}}],
        "connections": []
    });
    let catalog_path = common::write_catalog(dir.path(), "echo", &workflow, json!({}));
    let state = common::app_state("http://127.0.0.1:9", &catalog_path, dir.path());
    (server::router(state.clone()), state, dir)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, api_key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn authenticated_routes_reject_missing_or_wrong_key() {
    let (router, _state, _dir) = test_router().await;

    let response = router
        .clone()
        .oneshot(post_json(
            "/v1/jobs/generate",
            None,
            json!({"model": "echo", "input": [], "options": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(post_json(
            "/v1/jobs/generate",
            Some("wrong-key"),
            json!({"model": "echo", "input": [], "options": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_ready_need_no_auth() {
    let (router, _state, _dir) = test_router().await;

    let response = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("ok"));
    assert!(body["jobs"].get("completed").is_some());
    assert!(body["jobs"].get("inQueue").is_some());

    let response = router.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn node_catalog_lists_types_with_port_schemas() {
    let (router, _state, _dir) = test_router().await;

    let response = router
        .oneshot(
            Request::builder()
                .uri("/v1/workflow/nodes")
                .header("X-API-Key", common::API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let nodes = body["nodes"].as_array().unwrap();
    let switch = nodes
        .iter()
        .find(|n| n["name"] == json!("SwitchNode"))
        .expect("SwitchNode in catalog");
    assert_eq!(switch["category"], json!("control"));
    assert!(switch["input_ports"].get("data").is_some());
    assert!(switch["output_ports"].get("fallback").is_some());
    assert_eq!(
        switch["input_ports"]["data"]["port_type"],
        json!("any")
    );

    assert!(
        body["categories"]["control"]
            .as_array()
            .unwrap()
            .contains(&json!("MergeNode"))
    );
}

#[tokio::test]
async fn webhook_requires_id_but_tolerates_unknown_ids() {
    let (router, _state, _dir) = test_router().await;

    let response = router
        .clone()
        .oneshot(post_json("/webhook", None, json!({"status": "completed"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown id: logged, dropped, still 200.
    let response = router
        .oneshot(post_json(
            "/webhook",
            None,
            json!({"id": "nobody-waiting", "status": "completed"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("success"));
}

#[tokio::test]
async fn workflow_execute_then_status_roundtrip() {
    let (router, _state, _dir) = test_router().await;

    let response = router
        .clone()
        .oneshot(post_json(
            "/v1/workflow/execute",
            Some(common::API_KEY),
            json!({
                "workflow": {
                    "nodes": [
                        {"id": "a", "type": "TextInputNode", "input_values": {"text": "ping"}}
                    ],
                    "connections": []
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("accepted"));
    let task_id = body["task_id"].as_str().unwrap().to_string();

    // Poll until the detached task completes.
    let mut last = json!(null);
    for _ in 0..100 {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/workflow/status/{task_id}"))
                    .header("X-API-Key", common::API_KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        last = body_json(response).await;
        if last["status"] != json!("running") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(last["status"], json!("completed"));
    assert_eq!(last["result"]["a"]["text"], json!("ping"));
}

#[tokio::test]
async fn invalid_workflow_definition_is_a_400() {
    let (router, _state, _dir) = test_router().await;

    let response = router
        .oneshot(post_json(
            "/v1/workflow/execute",
            Some(common::API_KEY),
            json!({
                "workflow": {
                    "nodes": [{"id": "a", "type": "NoSuchNode"}],
                    "connections": []
                }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_workflow_task_is_a_404() {
    let (router, _state, _dir) = test_router().await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/workflow/status/ghost")
                .header("X-API-Key", common::API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .oneshot(post_json(
            "/v1/workflow/cancel/ghost",
            Some(common::API_KEY),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_unknown_job_is_a_404() {
    let (router, _state, _dir) = test_router().await;

    let response = router
        .oneshot(post_json("/cancel/ghost", Some(common::API_KEY), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn file_routes_serve_registered_files_and_404_otherwise() {
    let (router, state, _dir) = test_router().await;

    let response = router.clone().oneshot(get("/files/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let file_id = state
        .files
        .store_bytes("job-1", "clip.mp4", b"not-really-a-video")
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(get(&format!("/files/{file_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "video/mp4"
    );

    let response = router
        .oneshot(get(&format!("/files/{file_id}/info")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info = body_json(response).await;
    assert_eq!(info["job_id"], json!("job-1"));
    assert_eq!(info["filename"], json!("clip.mp4"));
    assert!(info.get("expires_at").is_some());
}

#[tokio::test]
async fn purge_queue_reports_removed_count() {
    let (router, _state, _dir) = test_router().await;

    let response = router
        .oneshot(post_json("/purge-queue", Some(common::API_KEY), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["removed"], json!(0));
    assert_eq!(body["status"], json!("completed"));
}
