//! Black-box API tests: real server on an ephemeral port, real worker pool,
//! in-memory infrastructure.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _pool: loreforge_engine::WorkerPoolHandle,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same wiring as prod (in-memory defaults), bound to an ephemeral port.
        let (app, pool) = loreforge_api::app::build_app().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            _pool: pool,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn submit(client: &reqwest::Client, base_url: &str, body: Value) -> String {
    let resp = client
        .post(format!("{base_url}/tasks"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: Value = resp.json().await.unwrap();
    body["task_id"].as_str().unwrap().to_string()
}

async fn get_task(client: &reqwest::Client, base_url: &str, id: &str) -> Value {
    let resp = client
        .get(format!("{base_url}/tasks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    resp.json().await.unwrap()
}

async fn await_terminal(client: &reqwest::Client, base_url: &str, id: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let task = get_task(client, base_url, id).await;
        let status = task["status"].as_str().unwrap();
        if matches!(status, "completed" | "failed" | "stopped") {
            return task;
        }
        assert!(Instant::now() < deadline, "task {id} never reached a terminal state");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn submit_and_follow_episode_ingest_to_completion() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let task_id = submit(
        &client,
        &server.base_url,
        json!({
            "job_type": "episode_ingest",
            "parameters": {"content": "alice met bob"},
        }),
    )
    .await;

    let task = await_terminal(&client, &server.base_url, &task_id).await;
    assert_eq!(task["status"], "completed");
    assert_eq!(task["progress"], 100);
    assert_eq!(task["result"]["entities"], 3);
    assert_eq!(task["result"]["relationships"], 2);
    assert!(task["worker_id"].as_str().unwrap().starts_with("ingest-worker"));
}

#[tokio::test]
async fn failed_task_reports_error_and_supports_retry() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Missing 'content' makes the handler fail deterministically.
    let task_id = submit(
        &client,
        &server.base_url,
        json!({"job_type": "episode_ingest", "parameters": {}}),
    )
    .await;

    let task = await_terminal(&client, &server.base_url, &task_id).await;
    assert_eq!(task["status"], "failed");
    assert!(
        task["error"]
            .as_str()
            .unwrap()
            .contains("requires a 'content' string")
    );

    // Explicit retry resets the record and re-enqueues.
    let resp = client
        .post(format!("{}/tasks/{}/retry", server.base_url, task_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let reset: Value = resp.json().await.unwrap();
    assert_eq!(reset["status"], "pending");
    assert_eq!(reset["progress"], 0);
    assert_eq!(reset["retry_count"], 1);
    assert!(reset["error"].is_null());

    // Same parameters, same deterministic failure on the second attempt.
    let task = await_terminal(&client, &server.base_url, &task_id).await;
    assert_eq!(task["status"], "failed");
    assert_eq!(task["retry_count"], 1);
}

#[tokio::test]
async fn stop_is_cooperative_and_wins_over_completion() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let task_id = submit(
        &client,
        &server.base_url,
        json!({
            "job_type": "episode_ingest",
            "parameters": {"content": "a b c"},
        }),
    )
    .await;

    let resp = client
        .post(format!("{}/tasks/{}/stop", server.base_url, task_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let task = await_terminal(&client, &server.base_url, &task_id).await;
    assert_eq!(task["status"], "stopped");
    assert!(task["result"].is_null());

    // Stopping again conflicts; retrying a stopped task is policy-gated off
    // by default.
    let resp = client
        .post(format!("{}/tasks/{}/stop", server.base_url, task_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = client
        .post(format!("{}/tasks/{}/retry", server.base_url, task_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn stream_replays_snapshot_and_terminal_for_finished_task() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let task_id = submit(
        &client,
        &server.base_url,
        json!({
            "job_type": "community_rebuild",
            "parameters": {"group_ids": ["g1", "g2"]},
        }),
    )
    .await;
    await_terminal(&client, &server.base_url, &task_id).await;

    // The stream of an already-finished task closes after snapshot + terminal,
    // so the whole body can be read.
    let body = client
        .get(format!("{}/tasks/{}/stream", server.base_url, task_id))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("event: progress"));
    assert!(body.contains("event: completed"));
    assert!(body.contains("\"communities\":2"));
}

#[tokio::test]
async fn stream_of_unknown_task_emits_error_event() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!(
            "{}/tasks/{}/stream",
            server.base_url,
            uuid::Uuid::now_v7()
        ))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("event: error"));
    assert!(body.contains("task not found"));
}

#[tokio::test]
async fn list_and_stats_reflect_submitted_tasks() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let entity_id = uuid::Uuid::now_v7();
    let task_id = submit(
        &client,
        &server.base_url,
        json!({
            "job_type": "episode_ingest",
            "parameters": {"content": "x"},
            "related_entity": {"entity_id": entity_id, "entity_type": "project"},
        }),
    )
    .await;
    await_terminal(&client, &server.base_url, &task_id).await;

    let resp: Value = client
        .get(format!("{}/tasks?status=completed", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["tasks"].as_array().unwrap().len(), 1);

    let resp: Value = client
        .get(format!(
            "{}/tasks?entity_id={}&entity_type=project",
            server.base_url, entity_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["tasks"][0]["id"].as_str().unwrap(), task_id);

    let resp: Value = client
        .get(format!("{}/system/stats", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["tasks"]["completed"], 1);
}

#[tokio::test]
async fn malformed_and_unknown_ids_are_rejected() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/tasks/not-a-uuid", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .get(format!("{}/tasks/{}", server.base_url, uuid::Uuid::now_v7()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
