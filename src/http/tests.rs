use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use super::{build_router, HttpState};
use crate::context::ServiceContext;
use crate::model::ModelArtifact;
use crate::testing::{
    silent_wav_bytes, sine_wav_bytes, small_config, synthetic_cache, write_untrained_artifact,
};

const BOUNDARY: &str = "us8k-test-boundary";

fn make_router(dir: &TempDir, classes: Option<&[&str]>) -> Router {
    let config = small_config(dir.path());
    if let Some(classes) = classes {
        write_untrained_artifact(&ModelArtifact::from_config(&config.service), classes);
    }
    let context = Arc::new(ServiceContext::new(config));
    context.try_initial_load();
    build_router(HttpState::new(context))
}

fn multipart_body(field: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(field: &str, payload: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(field, payload)))
        .expect("predict request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("GET request")
}

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .expect("POST request")
}

async fn response_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    let json = serde_json::from_slice::<Value>(&bytes).expect("JSON body");
    (status, json)
}

#[tokio::test]
async fn health_before_load_reports_unloaded() {
    let dir = TempDir::new().unwrap();
    let (status, json) = response_json(
        make_router(&dir, None)
            .oneshot(get_request("/health"))
            .await
            .expect("health call"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["model_loaded"], false);
    assert_eq!(json["state"], "unloaded");
}

#[tokio::test]
async fn predict_while_unloaded_is_server_error() {
    let dir = TempDir::new().unwrap();
    let (status, json) = response_json(
        make_router(&dir, None)
            .oneshot(upload_request("file", &silent_wav_bytes(8_000, 4_000)))
            .await
            .expect("predict call"),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = json["error"].as_str().unwrap_or_default();
    assert!(!message.is_empty());
}

#[tokio::test]
async fn predict_silent_clip_returns_probabilities() {
    let dir = TempDir::new().unwrap();
    let classes = ["car_horn", "dog_bark", "siren"];
    let (status, json) = response_json(
        make_router(&dir, Some(&classes))
            .oneshot(upload_request("file", &silent_wav_bytes(8_000, 2_000)))
            .await
            .expect("predict call"),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {json}");
    let probs: Vec<f64> = json["probs"]
        .as_array()
        .expect("probs array")
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(probs.len(), classes.len());
    assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-3);
    assert!(classes.contains(&json["prediction"].as_str().unwrap()));
}

#[tokio::test]
async fn predict_accepts_stereo_at_other_rate() {
    let dir = TempDir::new().unwrap();
    let (status, json) = response_json(
        make_router(&dir, Some(&["a", "b"]))
            .oneshot(upload_request("file", &sine_wav_bytes(16_000, 440.0, 16_000, 2)))
            .await
            .expect("predict call"),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {json}");
    assert_eq!(json["probs"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn predict_rejects_undecodable_upload() {
    let dir = TempDir::new().unwrap();
    let (status, json) = response_json(
        make_router(&dir, Some(&["a", "b"]))
            .oneshot(upload_request("file", b"this is not audio"))
            .await
            .expect("predict call"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("decode"));
}

#[tokio::test]
async fn predict_requires_file_field() {
    let dir = TempDir::new().unwrap();
    let (status, json) = response_json(
        make_router(&dir, Some(&["a", "b"]))
            .oneshot(upload_request("audio", &silent_wav_bytes(8_000, 100)))
            .await
            .expect("predict call"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("'file'"));
}

#[tokio::test]
async fn predict_without_multipart_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let (status, json) = response_json(
        make_router(&dir, Some(&["a", "b"]))
            .oneshot(post_request("/predict"))
            .await
            .expect("predict call"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn info_lists_classes() {
    let dir = TempDir::new().unwrap();
    let (status, json) = response_json(
        make_router(&dir, Some(&["drilling", "siren"]))
            .oneshot(get_request("/"))
            .await
            .expect("info call"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model_loaded"], true);
    assert_eq!(json["classes"], serde_json::json!(["drilling", "siren"]));
    assert!(json["description"].is_string());
}

#[tokio::test]
async fn reload_picks_up_new_artifact() {
    let dir = TempDir::new().unwrap();
    let router = make_router(&dir, None);

    let (status, json) = response_json(router.clone().oneshot(post_request("/reload")).await.unwrap()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("load"));

    let config = small_config(dir.path());
    write_untrained_artifact(&ModelArtifact::from_config(&config.service), &["a", "b"]);

    let (status, json) = response_json(router.oneshot(post_request("/reload")).await.unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model_loaded"], true);
    assert_eq!(json["state"], "ready");
}

#[tokio::test]
async fn retrain_acknowledges_and_reports_status() {
    let dir = TempDir::new().unwrap();
    let router = make_router(&dir, None);

    let (_, idle) = response_json(router.clone().oneshot(get_request("/retrain/status")).await.unwrap()).await;
    assert_eq!(idle["state"], "idle");

    synthetic_cache(&[4, 4], 24, 32, 21)
        .save(small_config(dir.path()).service.feature_cache_dir)
        .unwrap();

    let (status, ack) = response_json(router.clone().oneshot(post_request("/retrain")).await.unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "retraining_started");
    assert_eq!(ack["job_id"], 1);

    let mut last = Value::Null;
    for _ in 0..600 {
        let (_, json) =
            response_json(router.clone().oneshot(get_request("/retrain/status")).await.unwrap()).await;
        if json["state"] != "queued" && json["state"] != "running" {
            last = json;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(last["state"], "succeeded", "status: {last}");
    assert_eq!(last["job_id"], 1);

    let (_, health) = response_json(router.oneshot(get_request("/health")).await.unwrap()).await;
    assert_eq!(health["model_loaded"], true);
}

#[tokio::test]
async fn retrain_status_reports_each_queued_job() {
    let dir = TempDir::new().unwrap();
    let router = make_router(&dir, None);
    synthetic_cache(&[4, 4], 24, 32, 17)
        .save(small_config(dir.path()).service.feature_cache_dir)
        .unwrap();

    let (_, first) = response_json(router.clone().oneshot(post_request("/retrain")).await.unwrap()).await;
    let (_, second) = response_json(router.clone().oneshot(post_request("/retrain")).await.unwrap()).await;
    assert_eq!(first["job_id"], 1);
    assert_eq!(second["job_id"], 2);

    let (_, latest) = response_json(router.clone().oneshot(get_request("/retrain/status")).await.unwrap()).await;
    assert_eq!(latest["job_id"], 2);

    for job_id in [1, 2] {
        let uri = format!("/retrain/status?job_id={job_id}");
        let mut last = Value::Null;
        for _ in 0..600 {
            let (_, json) = response_json(router.clone().oneshot(get_request(&uri)).await.unwrap()).await;
            if json["state"] != "queued" && json["state"] != "running" {
                last = json;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(last["state"], "succeeded", "job {job_id}: {last}");
        assert_eq!(last["job_id"], job_id);
    }

    let (_, unknown) = response_json(router.oneshot(get_request("/retrain/status?job_id=99")).await.unwrap()).await;
    assert_eq!(unknown["state"], "idle");
}
