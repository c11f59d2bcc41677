//! HTTP contract tests for the task remote.
//!
//! These tests verify the exact request shape the client sends and how it
//! maps every response class:
//! - Paths, filters, and headers of each task and auth call
//! - Non-success statuses become `Rejected` with the server's message
//! - An empty representation from create or update is a rejection
//! - Unknown priority and category values decode to defaults
//! - Connection and decode failures are transport-level errors

use std::time::Duration;

use serde_json::json;
use tasksync::remote::{HttpTaskRemote, RemoteEndpoints, RemoteError, TaskRemote};
use tasksync::sync::SyncError;
use tasksync_proto::auth::AuthRequest;
use tasksync_proto::task::{TaskCategory, TaskId, TaskPatch, TaskPriority, TaskRequest};
use wiremock::matchers::{
    body_json, body_partial_json, header, headers, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "anon-key";
const TOKEN: &str = "user-token";

fn remote_for(server: &MockServer) -> HttpTaskRemote {
    HttpTaskRemote::new(RemoteEndpoints::from_base(&server.uri(), API_KEY).unwrap()).unwrap()
}

fn row(id: &str, priority: serde_json::Value, category: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "owner_id": "u1",
        "title": format!("task {id}"),
        "description": null,
        "completed": false,
        "created_at": "2024-03-01T10:00:00.123456+00:00",
        "priority": priority,
        "category": category,
        "due_date": null
    })
}

fn request() -> TaskRequest {
    TaskRequest {
        id: None,
        owner_id: "u1".to_string(),
        title: "Buy milk".to_string(),
        description: None,
        completed: false,
        priority: TaskPriority::High,
        category: TaskCategory::Shopping,
        due_date: None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request shape
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_sends_owner_filter_and_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("owner_id", "eq.u1"))
        .and(query_param("select", "*"))
        .and(header("apikey", API_KEY))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            row("a", json!(1), json!("work")),
            row("b", json!(3), json!("home")),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let tasks = remote_for(&server).list_tasks(TOKEN, "u1").await.unwrap();

    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].priority, TaskPriority::Low);
    assert_eq!(tasks[1].category, TaskCategory::Home);
    assert!(tasks.iter().all(|t| t.synced));
}

#[tokio::test]
async fn create_asks_for_representation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/tasks"))
        .and(header("prefer", "return=representation"))
        .and(header("apikey", API_KEY))
        .and(body_json(json!({
            "owner_id": "u1",
            "title": "Buy milk",
            "description": null,
            "completed": false,
            "priority": 3,
            "category": "shopping",
            "due_date": null
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!([row("srv-1", json!(3), json!("shopping"))])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let task = remote_for(&server).create_task(TOKEN, &request()).await.unwrap();

    assert_eq!(task.id, TaskId::new("srv-1"));
    assert_eq!(task.priority, TaskPriority::High);
}

#[tokio::test]
async fn keyed_create_asks_to_merge_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/tasks"))
        .and(headers(
            "prefer",
            vec!["return=representation", "resolution=merge-duplicates"],
        ))
        .and(body_partial_json(json!({"id": "local-1", "title": "Buy milk"})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!([row("local-1", json!(3), json!("shopping"))])),
        )
        .expect(2)
        .mount(&server)
        .await;

    let remote = remote_for(&server);
    let keyed = TaskRequest {
        id: Some(TaskId::new("local-1")),
        ..request()
    };
    for _ in 0..2 {
        let task = remote.create_task(TOKEN, &keyed).await.unwrap();
        assert_eq!(task.id, TaskId::new("local-1"));
    }
}

#[tokio::test]
async fn update_sends_only_set_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("id", "eq.t1"))
        .and(header("prefer", "return=representation"))
        .and(body_json(json!({"completed": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "t1",
            "owner_id": "u1",
            "title": "done",
            "completed": true,
            "created_at": "2024-03-01T10:00:00Z"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let task = remote_for(&server)
        .update_task(TOKEN, &TaskId::new("t1"), &TaskPatch::completed(true))
        .await
        .unwrap();

    assert!(task.completed);
    assert_eq!(task.priority, TaskPriority::Medium);
    assert_eq!(task.category, TaskCategory::Other);
}

#[tokio::test]
async fn delete_targets_single_row() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/tasks"))
        .and(query_param("id", "eq.t1"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    remote_for(&server)
        .delete_task(TOKEN, &TaskId::new("t1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn auth_calls_carry_api_key_but_no_bearer() {
    let server = MockServer::start().await;
    let auth_body = json!({"accessToken": "fresh", "user": {"id": "u1", "email": "a@b.c"}});
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .and(body_partial_json(json!({"email": "a@b.c"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(auth_body))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_for(&server);
    let creds = AuthRequest {
        email: "a@b.c".to_string(),
        password: "hunter22".to_string(),
    };
    let signed_up = remote.sign_up(&creds).await.unwrap();
    let signed_in = remote.sign_in(&creds).await.unwrap();
    assert_eq!(signed_up.access_token, "fresh");
    assert_eq!(signed_in.user.id, "u1");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for req in &requests {
        assert_eq!(
            req.headers.get("apikey").and_then(|v| v.to_str().ok()),
            Some(API_KEY)
        );
        assert!(req.headers.get("authorization").is_none());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Error mapping
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn error_status_carries_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "JWT expired"})),
        )
        .mount(&server)
        .await;

    let err = remote_for(&server).list_tasks(TOKEN, "u1").await.unwrap_err();

    assert_eq!(
        err,
        RemoteError::Rejected {
            status: 401,
            message: "JWT expired".to_string()
        }
    );
    assert_eq!(
        SyncError::from(err),
        SyncError::RemoteRejected {
            status: 401,
            message: "JWT expired".to_string()
        }
    );
}

#[tokio::test]
async fn empty_error_body_uses_reason_phrase() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = remote_for(&server)
        .delete_task(TOKEN, &TaskId::new("t1"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RemoteError::Rejected {
            status: 503,
            message: "Service Unavailable".to_string()
        }
    );
}

#[tokio::test]
async fn empty_representation_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/tasks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let remote = remote_for(&server);
    let create = remote.create_task(TOKEN, &request()).await.unwrap_err();
    assert_eq!(create.status(), Some(201));
    let update = remote
        .update_task(TOKEN, &TaskId::new("t1"), &TaskPatch::completed(true))
        .await
        .unwrap_err();
    assert_eq!(update.status(), Some(200));
}

#[tokio::test]
async fn malformed_body_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = remote_for(&server).list_tasks(TOKEN, "u1").await.unwrap_err();

    assert!(matches!(err, RemoteError::Decode(_)));
    assert!(matches!(SyncError::from(err), SyncError::Transport(_)));
}

#[tokio::test]
async fn unreachable_host_is_transport_error() {
    // Bind then drop a listener so the port is closed.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut endpoints = RemoteEndpoints::from_base(&format!("http://{addr}"), API_KEY).unwrap();
    endpoints.timeout = Duration::from_secs(2);
    let remote = HttpTaskRemote::new(endpoints).unwrap();

    let err = remote.list_tasks(TOKEN, "u1").await.unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)));
}

// ────────────────────────────────────────────────────────────────────────────
// Normalization
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_enum_values_decode_to_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            row("a", json!(7), json!("garden")),
            row("b", json!("urgent"), json!(null)),
            row("c", json!(null), json!("WORK")),
        ])))
        .mount(&server)
        .await;

    let tasks = remote_for(&server).list_tasks(TOKEN, "u1").await.unwrap();

    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.priority == TaskPriority::Medium));
    assert_eq!(tasks[0].category, TaskCategory::Other);
    assert_eq!(tasks[1].category, TaskCategory::Other);
    assert_eq!(tasks[2].category, TaskCategory::Other);
}
