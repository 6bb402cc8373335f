//! Router-level tests against the full pipeline in mock mode.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use reviewlens::config::PipelineConfig;
use reviewlens::{AppState, Config};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn mock_app() -> Router {
    let config = Arc::new(Config {
        mock: true,
        pipeline: PipelineConfig {
            inter_wave_delay: Duration::from_millis(1),
            ..Default::default()
        },
        ..Default::default()
    });
    let state = AppState::new(config).expect("state builds in mock mode");
    reviewlens::server::router(state)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

const VALID_CLASSIFICATIONS: [&str; 7] = [
    "Genuine-Positive",
    "Genuine-Negative",
    "Fake-Malicious",
    "Fake-Promotional",
    "Insufficient-Text",
    "Unknown",
    "Error",
];

fn assert_well_formed_record(record: &Value) {
    let classification = record["classification"].as_str().unwrap();
    assert!(VALID_CLASSIFICATIONS.contains(&classification));
    let confidence: u32 = record["confidence"].as_str().unwrap().parse().unwrap();
    assert!(confidence <= 100);
    assert!(record["explanation"].is_string());
}

#[tokio::test]
async fn analyze_rejects_missing_review() {
    let app = mock_app();
    let (status, body) = post_json(&app, "/analyze", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn analyze_short_review_skips_model() {
    let app = mock_app();
    let (status, body) = post_json(&app, "/analyze", json!({ "review": "ok" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["classification"], "Insufficient-Text");
    assert_eq!(body["confidence"], "0");
}

#[tokio::test]
async fn analyze_single_review_in_mock_mode() {
    let app = mock_app();
    let (status, body) = post_json(&app, "/analyze", json!({ "review": "a great meal" })).await;
    assert_eq!(status, StatusCode::OK);
    // deterministic mock confidence: clamp(12, 50, 95)
    assert_eq!(body["confidence"], "50");
    assert_eq!(body["explanation"], "Mocked analysis based on length");
    assert_well_formed_record(&body);
}

#[tokio::test]
async fn analyze_all_returns_one_record_per_review_id_sorted() {
    let app = mock_app();
    let reviews: Vec<Value> = (0..25)
        .map(|i| {
            if i % 6 == 0 {
                json!("x") // short
            } else {
                json!(format!("review number {i} with plenty of detail"))
            }
        })
        .collect();

    let (status, body) = post_json(&app, "/analyze-all", json!({ "reviews": reviews })).await;
    assert_eq!(status, StatusCode::OK);

    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 25);
    for record in records {
        assert_well_formed_record(record);
    }
    let ids: Vec<u64> = records.iter().map(|r| r["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, (0..25).collect::<Vec<u64>>());
    assert_eq!(records[0]["classification"], "Insufficient-Text");
}

#[tokio::test]
async fn analyze_all_echoes_payload_fields() {
    let app = mock_app();
    let reviews = json!([
        { "id": 3, "snippet": "wonderful service and lovely staff", "author": "pat", "rating": 5 }
    ]);
    let (status, body) = post_json(&app, "/analyze-all", json!({ "reviews": reviews })).await;
    assert_eq!(status, StatusCode::OK);

    let record = &body.as_array().unwrap()[0];
    assert_eq!(record["id"], 3);
    assert_eq!(record["author"], "pat");
    assert_eq!(record["rating"], 5);
}

#[tokio::test]
async fn analyze_all_rejects_empty_and_duplicate_ids() {
    let app = mock_app();

    let (status, _) = post_json(&app, "/analyze-all", json!({ "reviews": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(&app, "/analyze-all", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let reviews = json!(["a plain review", { "id": 0, "text": "collides with index 0" }]);
    let (status, body) = post_json(&app, "/analyze-all", json!({ "reviews": reviews })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("duplicate"));
}

#[tokio::test]
async fn analyze_page_classifies_requested_slice_only() {
    let app = mock_app();
    let reviews: Vec<Value> = (0..20)
        .map(|i| json!(format!("review number {i} with plenty of detail")))
        .collect();

    let (status, body) = post_json(
        &app,
        "/analyze-page",
        json!({ "reviews": reviews, "page": 2, "pageSize": 8 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 8);
    // ids stay global to the full list
    let ids: Vec<u64> = records.iter().map(|r| r["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, (8..16).collect::<Vec<u64>>());
}

#[tokio::test]
async fn analyze_page_tolerates_out_of_range_page() {
    let app = mock_app();
    let reviews: Vec<Value> = (0..4)
        .map(|i| json!(format!("review number {i} with plenty of detail")))
        .collect();

    let (status, body) = post_json(
        &app,
        "/analyze-page",
        json!({ "reviews": reviews, "page": usize::MAX, "pageSize": 8 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn stream_start_validates_input() {
    let app = mock_app();
    let (status, _) = post_json(&app, "/analyze-all-stream/start", json!({ "reviews": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stream_rejects_missing_or_unknown_job() {
    let app = mock_app();

    let (status, _) = get_text(&app, "/analyze-all-stream").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_text(&app, "/analyze-all-stream?jobId=job_bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stream_merges_one_wave_into_one_batch_event() {
    let app = mock_app();

    // 25 eligible reviews, batch 12, width 3: 3 batches, all in one wave
    let reviews: Vec<Value> = (0..25)
        .map(|i| json!(format!("review number {i} with plenty of detail")))
        .collect();

    let (status, body) = post_json(
        &app,
        "/analyze-all-stream/start",
        json!({ "reviews": reviews }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let (status, stream_body) =
        get_text(&app, &format!("/analyze-all-stream?jobId={job_id}")).await;
    assert_eq!(status, StatusCode::OK);

    // no short bypass, so exactly one model-backed batch event
    assert_eq!(stream_body.matches("event: batch").count(), 1);
    assert_eq!(stream_body.matches("event: done").count(), 1);
}

#[tokio::test]
async fn stream_emits_batches_then_done_and_deletes_job() {
    let app = mock_app();

    // 25 reviews: one short bypass + 24 eligible (2 batches, 1 wave)
    let reviews: Vec<Value> = (0..25)
        .map(|i| {
            if i == 0 {
                json!("x")
            } else {
                json!(format!("review number {i} with plenty of detail"))
            }
        })
        .collect();

    let (status, body) = post_json(
        &app,
        "/analyze-all-stream/start",
        json!({ "reviews": reviews }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let (status, stream_body) =
        get_text(&app, &format!("/analyze-all-stream?jobId={job_id}")).await;
    assert_eq!(status, StatusCode::OK);

    let batch_events = stream_body.matches("event: batch").count();
    assert_eq!(batch_events, 2, "short bypass + single wave");
    assert_eq!(stream_body.matches("event: done").count(), 1);

    // every submitted review appears exactly once across batch events
    let mut seen = 0;
    for line in stream_body.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            if let Ok(Value::Array(records)) = serde_json::from_str::<Value>(data) {
                seen += records.len();
            }
        }
    }
    assert_eq!(seen, 25);

    // the job is gone after its terminal event
    let (status, _) = get_text(&app, &format!("/analyze-all-stream?jobId={job_id}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
