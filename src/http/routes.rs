use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::context::{ServiceContext, ServiceState};
use crate::error::{log_service_error, ErrorCode, ServiceError};

const UPLOAD_FIELD: &str = "file";

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub context: Arc<ServiceContext>,
}

impl HttpState {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }
}

/// HTTP error variants mapped to JSON responses.
#[derive(Debug)]
pub enum HttpServerError {
    BadRequest(String),
    Service(ServiceError),
    Internal(String),
}

impl From<ServiceError> for HttpServerError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Service(err) => {
                let status = match err {
                    ServiceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.message())
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Health endpoint response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub state: ServiceState,
}

/// Root endpoint response payload.
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub model_loaded: bool,
    pub classes: Vec<String>,
    pub endpoints: &'static [&'static str],
}

/// Prediction response payload.
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub prediction: String,
    pub probs: Vec<f32>,
}

/// Retrain acknowledgement payload.
#[derive(Debug, Serialize)]
pub struct RetrainAck {
    pub status: &'static str,
    pub job_id: u64,
}

/// Optional `?job_id=` selector for `/retrain/status`
#[derive(Debug, Default, Deserialize)]
pub struct RetrainStatusQuery {
    pub job_id: Option<u64>,
}

/// Build the Axum router with all handlers.
pub fn build_router(state: HttpState) -> Router {
    let upload_limit = state.context.config().service.max_upload_bytes;
    Router::new()
        .route("/", get(info))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/retrain", post(retrain))
        .route("/retrain/status", get(retrain_status))
        .route("/reload", post(reload))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

/// Run the HTTP server loop until `shutdown` resolves.
pub async fn run_http_server<F>(state: HttpState, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP listener on {addr}"))?;
    log::info!("[Service] Listening on {}", addr);
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving HTTP router")?;
    Ok(())
}

fn health_payload(context: &ServiceContext) -> Result<HealthResponse, HttpServerError> {
    let state = context.state()?;
    Ok(HealthResponse {
        status: "ok",
        model_loaded: state == ServiceState::Ready,
        state,
    })
}

pub async fn info(State(state): State<HttpState>) -> Result<Json<InfoResponse>, HttpServerError> {
    let context = &state.context;
    Ok(Json(InfoResponse {
        service: "us8k_classifier",
        version: env!("CARGO_PKG_VERSION"),
        description: "Urban sound clip classifier: POST an audio file to /predict",
        model_loaded: context.is_loaded(),
        classes: context.classes()?,
        endpoints: &[
            "GET /",
            "GET /health",
            "POST /predict",
            "POST /retrain",
            "GET /retrain/status",
            "POST /reload",
        ],
    }))
}

pub async fn health(State(state): State<HttpState>) -> Result<Json<HealthResponse>, HttpServerError> {
    Ok(Json(health_payload(&state.context)?))
}

pub async fn predict(
    State(state): State<HttpState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, HttpServerError> {
    let mut multipart =
        multipart.map_err(|rejection| HttpServerError::BadRequest(rejection.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| HttpServerError::BadRequest(err.body_text()))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| HttpServerError::BadRequest(err.body_text()))?;
            upload = Some(bytes);
            break;
        }
    }
    let bytes = upload.ok_or_else(|| {
        HttpServerError::BadRequest(format!("multipart field '{}' is required", UPLOAD_FIELD))
    })?;

    let context = Arc::clone(&state.context);
    let prediction = tokio::task::spawn_blocking(move || context.predict_bytes(&bytes))
        .await
        .map_err(|err| HttpServerError::Internal(err.to_string()))?
        .map_err(|err| {
            log_service_error(&err, "predict");
            err
        })?;

    Ok(Json(PredictResponse {
        prediction: prediction.label,
        probs: prediction.probs,
    }))
}

pub async fn retrain(State(state): State<HttpState>) -> Result<Json<RetrainAck>, HttpServerError> {
    let job_id = state.context.start_retrain()?;
    Ok(Json(RetrainAck {
        status: "retraining_started",
        job_id,
    }))
}

pub async fn retrain_status(
    State(state): State<HttpState>,
    Query(query): Query<RetrainStatusQuery>,
) -> Result<Response, HttpServerError> {
    let job = match query.job_id {
        Some(job_id) => state.context.retrain_job(job_id)?,
        None => state.context.retrain_status()?,
    };
    Ok(match job {
        Some(job) => Json(job).into_response(),
        None => Json(serde_json::json!({ "state": "idle" })).into_response(),
    })
}

pub async fn reload(State(state): State<HttpState>) -> Result<Json<HealthResponse>, HttpServerError> {
    let context = Arc::clone(&state.context);
    tokio::task::spawn_blocking(move || context.reload())
        .await
        .map_err(|err| HttpServerError::Internal(err.to_string()))??;
    Ok(Json(health_payload(&state.context)?))
}
