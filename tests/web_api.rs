//! Integration tests for the HTTP API

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt; // for .collect().await
use printlink_rs::board::Board;
use printlink_rs::config::Config;
use printlink_rs::web::api::create_router;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

fn test_app(config: &Config) -> (Router, Arc<Board>, TempDir) {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("cube.gcode"), "G28\nG1 X10\n").unwrap();
    let board = Arc::new(Board::new(config));
    (create_router(board.clone(), dir.path()), board, dir)
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_status_reports_snapshot() {
    let (app, _board, _dir) = test_app(&Config::default());
    let (status, json) = call(&app, "GET", "/printer/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Unknown");
    assert_eq!(json["hot_end"], 0.0);
    assert_eq!(json["progress"], 0.0);
}

#[tokio::test]
async fn test_send_queues_command() {
    let (app, _board, _dir) = test_app(&Config::default());
    let (status, json) = call(&app, "GET", "/printer/send?cmd=G1%20X10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "ok");
    assert_eq!(json["cmd"], 1);

    let long = "M117%20".to_string() + &"x".repeat(80);
    let (status, _) = call(&app, "GET", &format!("/printer/send?cmd={}", long)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_reports_full_queue() {
    let mut config = Config::default();
    config.protocol.queue_capacity = 2;
    let (app, _board, _dir) = test_app(&config);
    let (status, _) = call(&app, "GET", "/printer/send?cmd=G28").await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = call(&app, "GET", "/printer/send?cmd=G28").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_print_and_stop() {
    let (app, board, _dir) = test_app(&Config::default());

    let (status, _) = call(&app, "POST", "/printer/print?file=missing.gcode").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "POST", "/printer/print?file=..%2Fcube.gcode").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, "POST", "/printer/stop").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = call(&app, "POST", "/printer/print?file=cube.gcode").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "ok");
    assert_eq!(board.current_job().await.unwrap().total_size, 11);

    let (status, _) = call(&app, "POST", "/printer/print?file=cube.gcode").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(&app, "GET", "/printer/send?cmd=G28").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, "POST", "/printer/stop").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/printer/stop").await;
    assert_eq!(status, StatusCode::CONFLICT);
}
