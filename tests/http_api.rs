use std::path::Path;
use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use feedmirror::{AppState, AppendLog, QueryService, Record, router};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

fn write_log(dir: &TempDir, lines: &[String]) -> AppendLog {
    let path = dir.path().join("firebase-cache.jsonl");
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    std::fs::write(&path, contents).expect("log fixture should be writable");
    AppendLog::new(path).with_chunk_bytes(32)
}

fn line(id: &str, value: f64, ts: &str) -> String {
    serde_json::to_string(&Record::new(id, value, ts)).expect("record should serialize")
}

fn app(log: AppendLog, static_dir: Option<&Path>) -> axum::Router {
    let query = Arc::new(QueryService::new(log));
    router(AppState::new(query), static_dir.map(Path::to_path_buf))
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("response expected");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");

    if body.is_empty() {
        return (status, Value::Null);
    }

    let json = serde_json::from_slice::<Value>(&body).expect("body should be valid JSON");
    (status, json)
}

fn ids(body: &Value) -> Vec<String> {
    body.as_array()
        .expect("array body")
        .iter()
        .map(|record| record["id"].as_str().expect("id").to_string())
        .collect()
}

#[tokio::test]
async fn latest_data_returns_newest_records_oldest_first() {
    let dir = TempDir::new().unwrap();
    let lines: Vec<String> = (1..=5)
        .map(|i| line(&format!("k{i}"), i as f64, &format!("2024-03-05T10:0{i}:00Z")))
        .collect();
    let app = app(write_log(&dir, &lines), None);

    let (status, body) = get(&app, "/api/latest-data?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), ["k4", "k5"]);
    assert_eq!(body[1], json!({"id": "k5", "sensor1": 5.0, "fechaa": "2024-03-05T10:05:00Z"}));

    let (_, body) = get(&app, "/api/latest-data?limit=2&offset=3").await;
    assert_eq!(ids(&body), ["k1", "k2"]);

    let (_, body) = get(&app, "/api/latest-data").await;
    assert_eq!(ids(&body), ["k1", "k2", "k3", "k4", "k5"]);
}

#[tokio::test]
async fn latest_data_rejects_malformed_numbers_with_json_errors() {
    let dir = TempDir::new().unwrap();
    let app = app(write_log(&dir, &[line("k1", 1.0, "2024-03-05T10:00:00Z")]), None);

    let (status, body) = get(&app, "/api/latest-data?limit=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "input_error");
    assert!(body["error"].as_str().unwrap().contains("limit"));

    let (status, body) = get(&app, "/api/latest-data?offset=-2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("offset"));
}

#[tokio::test]
async fn latest_data_ignores_an_unterminated_final_line() {
    let dir = TempDir::new().unwrap();
    let log = write_log(&dir, &[line("k1", 1.0, "2024-03-05T10:00:00Z")]);
    let mut contents = std::fs::read_to_string(log.path()).unwrap();
    contents.push_str("{\"id\":\"k2\",\"sensor1\":2");
    std::fs::write(log.path(), contents).unwrap();
    let app = app(log, None);

    let (_, body) = get(&app, "/api/latest-data?limit=10").await;
    assert_eq!(ids(&body), ["k1"]);
}

#[tokio::test]
async fn day_endpoint_sorts_by_timestamp_and_accepts_query_form() {
    let dir = TempDir::new().unwrap();
    let lines = vec![
        line("late", 1.0, "2024-03-05T20:00:00Z"),
        line("other", 2.0, "2024-03-04T20:00:00Z"),
        line("early", 3.0, "2024-03-05T01:00:00Z"),
    ];
    let app = app(write_log(&dir, &lines), None);

    let (status, body) = get(&app, "/api/day/2024-03-05").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), ["early", "late"]);

    let (_, body) = get(&app, "/api/day?date=2024-03-04").await;
    assert_eq!(ids(&body), ["other"]);

    let (_, body) = get(&app, "/api/day/2023-01-01").await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn day_endpoint_rejects_bad_dates() {
    let dir = TempDir::new().unwrap();
    let app = app(write_log(&dir, &[]), None);

    let (status, body) = get(&app, "/api/day/05-03-2024").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "input_error");

    let (status, _) = get(&app, "/api/day").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_log_yields_null_last_record_and_zero_summary() {
    let dir = TempDir::new().unwrap();
    let app = app(AppendLog::new(dir.path().join("missing.jsonl")), None);

    let (status, body) = get(&app, "/api/last-record").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);

    let (status, body) = get(&app, "/api/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"total": 0}));

    let (_, body) = get(&app, "/api/latest-data").await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn summary_and_last_record_reflect_the_log() {
    let dir = TempDir::new().unwrap();
    let lines = vec![
        line("k1", 1.0, "2024-03-05T10:00:00Z"),
        line("k2", 2.0, "2024-03-01T10:00:00Z"),
        line("k3", 3.5, "2024-03-09T10:00:00Z"),
    ];
    let app = app(write_log(&dir, &lines), None);

    let (_, body) = get(&app, "/api/summary").await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["firstDate"], "2024-03-01T10:00:00Z");
    assert_eq!(body["lastDate"], "2024-03-09T10:00:00Z");
    assert_eq!(body["lastRecord"]["id"], "k3");

    let (_, body) = get(&app, "/api/last-record").await;
    assert_eq!(body["sensor1"], 3.5);
}

#[tokio::test]
async fn health_and_static_files_are_served() {
    let dir = TempDir::new().unwrap();
    let public = dir.path().join("public");
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.html"), "<h1>mirror</h1>").unwrap();
    let app = app(write_log(&dir, &[]), Some(&public));

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let request = Request::builder()
        .uri("/index.html")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"<h1>mirror</h1>");
}
