//! HTTP surface

use std::sync::Arc;

use anchor_deployer::services::deployment::DeploymentService;
use anchor_deployer::server::serve::router;
use anchor_deployer::server::state::ServerState;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::support::{script_happy_path, TestEnv, PROGRAM_ID, REPO_URL};

fn app(env: &TestEnv, production: bool) -> Router {
    let service = Arc::new(DeploymentService::new(&env.settings, env.runner.clone()));
    router(Arc::new(ServerState::new(service, production)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_deploy(body: impl Into<Body>) -> Request<Body> {
    Request::post("/deploy")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let env = TestEnv::new();
    let app = app(&env, false);

    let (status, body) = send(&app, get("/deploy/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_deployments"], 0);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_malformed_body_is_invalid_input() {
    let env = TestEnv::new();
    let app = app(&env, false);

    let (status, body) = send(&app, post_deploy("{\"repo_url\": ")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["deployment_id"].is_null());
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert!(env.runner.calls().is_empty());
}

#[tokio::test]
async fn test_request_validation() {
    let env = TestEnv::new();
    let app = app(&env, false);

    for request in [
        json!({ "repo_url": REPO_URL, "network": "localnet" }),
        json!({ "repo_url": REPO_URL, "wallet": { "address": PROGRAM_ID } }),
        json!({ "repo_url": REPO_URL, "wallet": { "secret_key": [1, 2, 3] } }),
        json!({ "network": "devnet" }),
    ] {
        let (status, body) = send(&app, post_deploy(request.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", request);
        assert_eq!(body["error"]["code"], "INVALID_INPUT", "{}", request);
    }
    assert!(env.runner.calls().is_empty());
}

#[tokio::test]
async fn test_disallowed_repository_carries_deployment_id() {
    let env = TestEnv::new();
    let app = app(&env, false);

    let request = json!({ "repo_url": "https://evil.example.com/acme/counter" });
    let (status, body) = send(&app, post_deploy(request.to_string())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert!(body["deployment_id"].is_string());
}

#[tokio::test]
async fn test_successful_deploy_and_status() {
    let env = TestEnv::new();
    script_happy_path(&env.runner);
    let app = app(&env, false);

    let request = json!({ "repo_url": REPO_URL, "network": "devnet" });
    let (status, body) = send(&app, post_deploy(request.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["program_id"], PROGRAM_ID);
    assert_eq!(body["data"]["network"], "devnet");
    assert_eq!(body["data"]["verified"], true);

    let id = body["deployment_id"].as_str().unwrap().to_string();
    let (status, body) = send(&app, get(&format!("/deploy/status/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployment_id"], id.as_str());
    assert_eq!(body["state"], "done");
    assert!(body["error_code"].is_null());
}

#[tokio::test]
async fn test_unknown_status_is_not_found() {
    let env = TestEnv::new();
    let app = app(&env, false);

    let (status, body) = send(&app, get("/deploy/status/no-such-id")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_production_masks_unclassified_failures() {
    let env = TestEnv::new();
    env.runner.on(
        "anchor",
        &["build"],
        crate::support::Reply::Panic("toolchain exploded"),
    );
    script_happy_path(&env.runner);
    let app = app(&env, true);

    let request = json!({ "repo_url": REPO_URL });
    let (status, body) = send(&app, post_deploy(request.to_string())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "SYSTEM_ERROR");
    assert_eq!(body["error"]["message"], "An internal error occurred");
    assert!(body["error"]["details"].is_null());
    assert!(!body.to_string().contains("toolchain exploded"));
}

#[tokio::test]
async fn test_classified_failures_are_not_masked() {
    let env = TestEnv::new();
    env.runner.on("git", &["clone"], crate::support::plain_repo());
    let app = app(&env, true);

    let request = json!({ "repo_url": REPO_URL });
    let (status, body) = send(&app, post_deploy(request.to_string())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_PROJECT");
    assert_ne!(body["error"]["message"], "An internal error occurred");
}
