//! HTTP surface: JSON analysis routes and the SSE streaming route.
//!
//! The route layer validates request shapes and hands lists of review
//! items to the pipeline; all classification semantics live below it.

use crate::config::Config;
use crate::error::{LensError, Result};
use crate::jobs::JobStore;
use crate::pipeline::{Pipeline, StreamEvent};
use crate::review::{ClassificationRecord, ReviewInput, ReviewItem};
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Classification pipeline (gate, pool, orchestrator).
    pub pipeline: Arc<Pipeline>,
    /// Streaming job registry.
    pub jobs: Arc<JobStore>,
    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Build the state shared by all routes.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&config))?);
        let jobs = Arc::new(JobStore::new());
        Ok(Self {
            pipeline,
            jobs,
            config,
        })
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/analyze", post(analyze))
        .route("/analyze-all", post(analyze_all))
        .route("/analyze-page", post(analyze_page))
        .route("/analyze-all-stream/start", post(start_stream_job))
        .route("/analyze-all-stream", get(open_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run the server until ctrl-c / SIGTERM.
pub async fn serve(config: Arc<Config>, port: u16) -> Result<()> {
    let state = AppState::new(config)?;
    Arc::clone(&state.jobs)
        .spawn_sweeper(state.config.jobs.sweep_interval, state.config.jobs.ttl);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "reviewlens server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}

async fn liveness() -> &'static str {
    "Backend is running!"
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    review: Option<String>,
}

async fn analyze(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<ClassificationRecord>> {
    let review = payload
        .review
        .filter(|r| !r.is_empty())
        .ok_or_else(|| LensError::Validation("no review provided".to_string()))?;

    let item = ReviewItem {
        id: 0,
        text: review,
        original: serde_json::Map::new(),
    };
    let record = state.pipeline.classify_single(item).await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct AnalyzeAllRequest {
    #[serde(default)]
    reviews: Option<Vec<ReviewInput>>,
}

fn require_reviews(reviews: Option<Vec<ReviewInput>>) -> Result<Vec<ReviewInput>> {
    reviews
        .filter(|r| !r.is_empty())
        .ok_or_else(|| LensError::Validation("no reviews provided in request body".to_string()))
}

async fn analyze_all(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeAllRequest>,
) -> Result<Json<Vec<ClassificationRecord>>> {
    let reviews = require_reviews(payload.reviews)?;
    let items = ReviewItem::from_inputs(reviews, 0)?;
    let records = state.pipeline.run_sorted(items).await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
struct AnalyzePageRequest {
    #[serde(default)]
    reviews: Option<Vec<ReviewInput>>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default, rename = "pageSize")]
    page_size: Option<usize>,
}

async fn analyze_page(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzePageRequest>,
) -> Result<Json<Vec<ClassificationRecord>>> {
    let reviews = require_reviews(payload.reviews)?;
    let page = payload.page.unwrap_or(1).max(1);
    let page_size = payload
        .page_size
        .unwrap_or(state.config.pipeline.page_size)
        .max(1);

    let start = (page - 1).saturating_mul(page_size);
    let slice: Vec<ReviewInput> = reviews
        .into_iter()
        .skip(start)
        .take(page_size)
        .collect();

    // positional ids stay global so page results align with the full list
    let items = ReviewItem::from_inputs(slice, start)?;
    let records = state.pipeline.run_sorted(items).await?;
    Ok(Json(records))
}

#[derive(Debug, Serialize)]
struct StartStreamResponse {
    #[serde(rename = "jobId")]
    job_id: String,
}

async fn start_stream_job(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeAllRequest>,
) -> Result<Json<StartStreamResponse>> {
    let reviews = require_reviews(payload.reviews)?;
    // validate ids up front so the failure is a 400 here, not mid-stream
    ReviewItem::from_inputs(reviews.clone(), 0)?;

    let job_id = state.jobs.register(reviews);
    Ok(Json(StartStreamResponse { job_id }))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    #[serde(rename = "jobId")]
    job_id: Option<String>,
}

async fn open_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let job_id = query.job_id.ok_or(LensError::JobNotFound)?;
    let reviews = state.jobs.claim(&job_id)?;
    let items = ReviewItem::from_inputs(reviews, 0)?;

    let (tx, rx) = mpsc::channel(8);
    let pipeline = Arc::clone(&state.pipeline);
    let jobs = Arc::clone(&state.jobs);
    tokio::spawn(async move {
        pipeline.run_streaming(items, tx).await;
        // gone after the terminal event (or after the client hung up)
        jobs.remove(&job_id);
    });

    let events = ReceiverStream::new(rx).map(|event| Ok(to_sse_event(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Batch(records) => match Event::default().event("batch").json_data(&records)
        {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "failed to serialize batch event");
                Event::default().comment("serialization-error")
            }
        },
        StreamEvent::Error(message) => {
            let data = serde_json::json!({ "error": message });
            Event::default()
                .event("error")
                .data(data.to_string())
        }
        StreamEvent::Done => Event::default().event("done").data("{}"),
    }
}
