use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cardio_model::{validate_observation, FeatureFrame, ModelArtifacts, ModelError};
use cardio_storage::{PredictionStore, StorageError};
use cardio_types::{ObservationId, PredictionRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared service state. Everything is constructed in the binary and
/// injected here; no process-wide globals.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PredictionStore>,
    pub artifacts: Arc<ModelArtifacts>,
    pub node_id: String,
    pub start_time: Instant,
    pub req_count: Arc<AtomicUsize>,
}

impl AppState {
    fn record_request(&self) -> u64 {
        self.req_count.fetch_add(1, Ordering::Relaxed) as u64 + 1
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type SharedState = Arc<AppState>;

/// Response of POST /predict. Validation failures carry `observation_id` and
/// `error` only; a duplicate-id insert carries all four fields.
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub observation_id: Option<ObservationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PredictResponse {
    fn error(observation_id: Option<ObservationId>, message: impl Into<String>) -> Self {
        Self {
            observation_id,
            prediction: None,
            probability: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    observation_id: ObservationId,
    true_class: i64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum UpdateResponse {
    Record(PredictionRecord),
    Error { error: String },
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    node_id: String,
    uptime_secs: u64,
    predictions_stored: u64,
    req_total: u64,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    node_id: String,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Transport-level failure (malformed request, storage fault). Domain errors
/// never use this; they stay inline in a 200 body.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal<S: Into<String>>(message: S) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let shared = Arc::new(state);
    let app = build_router(shared);
    let listener = bind_listener(addr).await?;
    axum::serve(listener, app)
        .await
        .context("RPC server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind RPC listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind RPC listener on {addr}"))
    }
}

pub(crate) fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/predict", post(handle_predict))
        .route("/update", post(handle_update))
        .route("/list-db-contents", get(handle_list_db_contents))
        .route("/health", get(handle_health))
        .route("/version", get(handle_version))
        .route("/metrics", get(handle_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_predict(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Json<PredictResponse>, ApiError> {
    state.record_request();

    let request = body.as_object();

    let Some(id_value) = request.and_then(|req| req.get("observation_id")) else {
        return Ok(Json(PredictResponse::error(
            None,
            "Must supply observation_id",
        )));
    };
    let observation_id: ObservationId = match serde_json::from_value(id_value.clone()) {
        Ok(id) => id,
        Err(_) => {
            return Ok(Json(PredictResponse::error(
                None,
                "observation_id must be a string or an integer",
            )));
        }
    };

    let Some(data_value) = request.and_then(|req| req.get("data")) else {
        return Ok(Json(PredictResponse::error(
            Some(observation_id),
            "Must supply data",
        )));
    };
    let Some(data) = data_value.as_object() else {
        return Ok(Json(PredictResponse::error(
            Some(observation_id),
            "data must be an object",
        )));
    };

    if let Err(violation) = validate_observation(data) {
        return Ok(Json(PredictResponse::error(
            Some(observation_id),
            violation.to_string(),
        )));
    }

    let frame = match FeatureFrame::build(&state.artifacts.schema, observation_id.clone(), data) {
        Ok(frame) => frame,
        Err(err @ ModelError::Coercion { .. }) => {
            return Ok(Json(PredictResponse::error(
                Some(observation_id),
                err.to_string(),
            )));
        }
        Err(err) => return Err(ApiError::internal(format!("failed to build frame: {err}"))),
    };

    let probability = state.artifacts.pipeline.predict_proba(&frame);
    let prediction = state.artifacts.pipeline.predict(&frame);

    let record = PredictionRecord::new(observation_id.clone(), data.clone(), probability);
    // A duplicate id does not void the prediction; the failure rides along
    // in the error field and nothing new is persisted.
    let error = match state.store.insert(record) {
        Ok(()) => None,
        Err(err @ StorageError::DuplicateObservation(_)) => {
            let message = format!("ERROR: {err}");
            warn!("{message}");
            Some(message)
        }
        Err(err) => {
            return Err(ApiError::internal(format!(
                "failed to store prediction: {err}"
            )))
        }
    };

    Ok(Json(PredictResponse {
        observation_id: Some(observation_id),
        prediction: Some(prediction),
        probability: Some(probability),
        error,
    }))
}

async fn handle_update(
    State(state): State<SharedState>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, ApiError> {
    state.record_request();

    match state
        .store
        .update_true_class(&request.observation_id, request.true_class)
    {
        Ok(record) => Ok(Json(UpdateResponse::Record(record))),
        Err(err @ StorageError::ObservationNotFound(_)) => Ok(Json(UpdateResponse::Error {
            error: err.to_string(),
        })),
        Err(err) => Err(ApiError::internal(format!(
            "failed to update true_class: {err}"
        ))),
    }
}

async fn handle_list_db_contents(
    State(state): State<SharedState>,
) -> Result<Json<Vec<PredictionRecord>>, ApiError> {
    state.record_request();
    let records = state
        .store
        .list()
        .map_err(|err| ApiError::internal(format!("failed to list predictions: {err}")))?;
    Ok(Json(records))
}

async fn handle_health(State(state): State<SharedState>) -> Result<Json<HealthResponse>, ApiError> {
    let req_total = state.record_request();
    let predictions_stored = state
        .store
        .count()
        .map_err(|err| ApiError::internal(format!("failed to count predictions: {err}")))?;

    Ok(Json(HealthResponse {
        status: "ok",
        node_id: state.node_id.clone(),
        uptime_secs: state.uptime_seconds(),
        predictions_stored,
        req_total,
    }))
}

async fn handle_version(State(state): State<SharedState>) -> Json<VersionResponse> {
    state.record_request();
    Json(VersionResponse {
        node_id: state.node_id.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_metrics(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let req_total = state.record_request();
    let uptime = state.uptime_seconds();
    let stored = state
        .store
        .count()
        .map_err(|err| ApiError::internal(format!("failed to count predictions: {err}")))?;

    let mut metrics =
        "# HELP cardio_http_requests_total Total number of RPC requests handled\n".to_string();
    metrics.push_str("# TYPE cardio_http_requests_total counter\n");
    metrics.push_str(&format!("cardio_http_requests_total {req_total}\n"));
    metrics.push_str("# HELP cardio_uptime_seconds Uptime of the service in seconds\n");
    metrics.push_str("# TYPE cardio_uptime_seconds gauge\n");
    metrics.push_str(&format!("cardio_uptime_seconds {uptime}\n"));
    metrics.push_str("# HELP cardio_predictions_stored Number of persisted prediction records\n");
    metrics.push_str("# TYPE cardio_predictions_stored gauge\n");
    metrics.push_str(&format!("cardio_predictions_stored {stored}\n"));

    let mut response = Response::new(Body::from(metrics));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(response)
}
