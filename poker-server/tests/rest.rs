use std::sync::Arc;

use poker_collab::db::InMemoryAuthorityStore;
use poker_collab::{AllFeaturesEnabled, AllowAllPermissions, Collab, InMemoryBlobStore, InMemoryTokenValidator, PokerContext};
use poker_core::{RuntimeConfig, SessionId, UserId};
use poker_impls::InMemoryBus;
use poker_server::{app, ServerContext};
use tokio::net::TcpListener;

async fn spawn_server() -> (String, Arc<InMemoryTokenValidator>) {
    let validator = Arc::new(InMemoryTokenValidator::new());

    let context = PokerContext {
        store: Arc::new(InMemoryAuthorityStore::new()),
        bus: Arc::new(InMemoryBus::new()),
        token_validator: validator.clone(),
        blob_store: Arc::new(InMemoryBlobStore::new()),
        permissions: Arc::new(AllowAllPermissions),
        feature_gate: Arc::new(AllFeaturesEnabled),
    };

    let collab = Collab::new(context);
    let server_context = ServerContext {
        collab: Arc::new(collab),
        runtime_config: Arc::new(RuntimeConfig::default()),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app(server_context).into_make_service()).await.unwrap();
    });

    (format!("http://127.0.0.1:{}", addr.port()), validator)
}

#[tokio::test]
async fn create_export_without_a_bearer_token_is_unauthenticated() {
    let (base, _validator) = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/reports/export"))
        .json(&serde_json::json!({ "sessionId": SessionId::new().to_string(), "format": "csv" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn create_export_then_fetch_its_status() {
    let (base, validator) = spawn_server().await;
    let user_id = UserId::new();
    validator.register("user-token", user_id);

    let client = reqwest::Client::new();
    let session_id = SessionId::new();

    let create_response = client
        .post(format!("{base}/reports/export"))
        .bearer_auth("user-token")
        .json(&serde_json::json!({ "sessionId": session_id.to_string(), "format": "csv" }))
        .send()
        .await
        .unwrap();

    assert_eq!(create_response.status(), 202);
    let created: serde_json::Value = create_response.json().await.unwrap();
    let job_id = created["jobId"].as_str().unwrap().to_string();

    let status_response = client
        .get(format!("{base}/jobs/{job_id}"))
        .bearer_auth("user-token")
        .send()
        .await
        .unwrap();

    assert_eq!(status_response.status(), 200);
    let status: serde_json::Value = status_response.json().await.unwrap();
    assert_eq!(status["jobId"], job_id);
    assert_eq!(status["status"], "pending");
}

#[tokio::test]
async fn job_status_is_forbidden_for_a_different_user() {
    let (base, validator) = spawn_server().await;
    let owner = UserId::new();
    let intruder = UserId::new();
    validator.register("owner-token", owner);
    validator.register("intruder-token", intruder);

    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/reports/export"))
        .bearer_auth("owner-token")
        .json(&serde_json::json!({ "sessionId": SessionId::new().to_string(), "format": "pdf" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let job_id = created["jobId"].as_str().unwrap();

    let response = client
        .get(format!("{base}/jobs/{job_id}"))
        .bearer_auth("intruder-token")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn job_status_for_an_unknown_job_is_not_found() {
    let (base, validator) = spawn_server().await;
    let user_id = UserId::new();
    validator.register("user-token", user_id);

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/jobs/{}", poker_core::JobId::new()))
        .bearer_auth("user-token")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}
