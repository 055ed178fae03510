//! API integration tests.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::Value;
use tower::ServiceExt;

mod common;
use common::{Call, test_app};

async fn post(app: &Router, uri: &str) -> (StatusCode, Option<Value>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::POST)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = (!body.is_empty()).then(|| serde_json::from_slice(&body).unwrap());
    (status, json)
}

async fn session_count(app: &Router) -> u64 {
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    json["sessions"].as_u64().unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = test_app(&[]);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["sessions"], 0);
}

#[tokio::test]
async fn test_create_start_resize_scenario() {
    let (app, runtime) = test_app(&["abc123abc123"]);

    let (status, json) = post(&app, "/containers/create").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.unwrap()["Id"], "abc123abc123");

    let (status, json) = post(&app, "/containers/abc123abc123/start").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(json.is_none());

    let (status, json) = post(&app, "/containers/abc123abc123/resize?h=40&w=120").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(json.is_none());

    let (status, json) = post(&app, "/containers/deadbeefdead/resize?h=40&w=120").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json = json.unwrap();
    assert!(json["message"].as_str().unwrap().contains("deadbeefdead"));
    assert_eq!(json["code"], "NOT_FOUND");

    assert_eq!(
        runtime.calls(),
        vec![
            Call::Create {
                image: "visidata".to_string(),
                memory: 100 * 1024 * 1024,
            },
            Call::Start("abc123abc123".to_string()),
            Call::Resize("abc123abc123".to_string(), 40, 120),
        ]
    );
}

#[tokio::test]
async fn test_out_of_grammar_ids_never_reach_runtime() {
    let (app, runtime) = test_app(&["abc123abc123"]);
    post(&app, "/containers/create").await;

    for uri in [
        "/containers/ABC123ABC123/start",
        "/containers/abc123/start",
        "/containers/abc123abc12g/start",
        "/containers/abc123abc123..%2f/resize?h=1&w=1",
    ] {
        let (status, json) = post(&app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(json.unwrap()["message"].is_string());
    }

    assert_eq!(runtime.calls().len(), 1);
}

#[tokio::test]
async fn test_invalid_resize_dimensions() {
    let (app, runtime) = test_app(&["abc123abc123"]);
    post(&app, "/containers/create").await;

    for query in ["h=0&w=80", "h=24", "h=24&w=abc", "h=70000&w=80", ""] {
        let uri = format!("/containers/abc123abc123/resize?{query}");
        let (status, json) = post(&app, &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{query}");
        assert_eq!(json.unwrap()["code"], "BAD_REQUEST");
    }

    assert_eq!(runtime.calls().len(), 1);
}

#[tokio::test]
async fn test_removed_sandbox_reports_runtime_message() {
    let (app, runtime) = test_app(&["abc123abc123"]);
    post(&app, "/containers/create").await;
    post(&app, "/containers/abc123abc123/start").await;

    runtime.remove("abc123abc123");
    let (status, json) = post(&app, "/containers/abc123abc123/resize?h=24&w=80").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json.unwrap()["message"], "No such container: abc123abc123");

    // Now forgotten; answered without the runtime.
    let calls = runtime.calls().len();
    let (status, _) = post(&app, "/containers/abc123abc123/start").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(runtime.calls().len(), calls);
}

#[tokio::test]
async fn test_removed_sandboxes_leave_the_session_count() {
    let ids: Vec<String> = (0..5).map(|n| format!("{n:0>12}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let (app, runtime) = test_app(&id_refs);

    for id in &ids {
        post(&app, "/containers/create").await;
        post(&app, &format!("/containers/{id}/start")).await;
    }
    assert_eq!(session_count(&app).await, 5);

    for id in &ids[..3] {
        runtime.remove(id);
        let (status, _) = post(&app, &format!("/containers/{id}/start")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    assert_eq!(session_count(&app).await, 2);
}

#[tokio::test]
async fn test_start_twice_is_accepted() {
    let (app, _) = test_app(&["abc123abc123"]);
    post(&app, "/containers/create").await;

    let (status, _) = post(&app, "/containers/abc123abc123/start").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = post(&app, "/containers/abc123abc123/start").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_unreachable_runtime_is_service_unavailable() {
    let (app, runtime) = test_app(&["abc123abc123"]);
    runtime.set_unavailable(true);

    let (status, json) = post(&app, "/containers/create").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json.unwrap()["code"], "SERVICE_UNAVAILABLE");
}
