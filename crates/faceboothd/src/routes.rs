//! HTTP surface of the daemon.

use crate::engine::{EngineError, EngineHandle};
use crate::templates::{self, TemplateError, TemplateStore};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use facebooth_core::{decode_data_uri, DecodeError, EncodedResult, ImageRole, PipelineError, ResultEncoder};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub templates: TemplateStore,
}

pub fn router(state: AppState, body_limit_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/get_templates", get(get_templates))
        .route("/template/{filename}", get(serve_template))
        .route("/process_swap", post(process_swap))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Error response: a status code plus `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        } else {
            tracing::info!(status = %self.status, error = %self.message, "request rejected");
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<TemplateError> for ApiError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::InvalidName(_) | TemplateError::NotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "Template image not found")
            }
            TemplateError::Io(e) => ApiError::internal(format!("cannot read template: {e}")),
        }
    }
}

impl From<DecodeError> for ApiError {
    fn from(e: DecodeError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, format!("invalid captured image: {e}"))
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Pipeline(PipelineError::NoFaceDetected(_)) => StatusCode::BAD_REQUEST,
            EngineError::Pipeline(PipelineError::Decode { role: ImageRole::Captured, .. }) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::Pipeline(PipelineError::Decode { role: ImageRole::Template, .. }) => {
                return ApiError::new(StatusCode::NOT_FOUND, "Template image not found");
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, e.body_text())
    }
}

#[derive(Debug, Deserialize)]
pub struct SwapRequest {
    pub captured_image: String,
    pub template: String,
    #[serde(default = "default_use_enhancement")]
    pub use_enhancement: bool,
}

fn default_use_enhancement() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SwapResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: EncodedResult,
}

async fn root() -> &'static str {
    "facebooth face swap service"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let caps = state.engine.capabilities();
    let status = if caps.detector && caps.swapper { "healthy" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "detector": caps.detector,
        "swapper": caps.swapper,
        "enhancement": caps.enhancement,
    }))
}

async fn get_templates(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let names = state.templates.list().await?;
    Ok(Json(serde_json::json!({ "templates": names })))
}

async fn serve_template(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = state.templates.read(&filename).await?;
    Ok(([(header::CONTENT_TYPE, templates::content_type(&filename))], bytes))
}

/// Swap the faces of a captured photo onto a template.
///
/// # Request (JSON):
/// - `captured_image`: data URI of the captured photo
/// - `template`: template file name
/// - `use_enhancement` (optional, default true)
async fn process_swap(
    State(state): State<AppState>,
    payload: Result<Json<SwapRequest>, JsonRejection>,
) -> Result<Json<SwapResponse>, ApiError> {
    let Json(req) = payload?;
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("swap", %request_id, template = %req.template);

    async move {
        tracing::info!(use_enhancement = req.use_enhancement, "swap requested");

        if !state.engine.capabilities().swapper {
            return Err(ApiError::from(EngineError::Pipeline(
                PipelineError::SwapCapabilityUnavailable,
            )));
        }

        let captured = decode_data_uri(&req.captured_image)?;
        let template = state.templates.read(&req.template).await?;

        let result = state
            .engine
            .swap(captured, template, req.use_enhancement)
            .await?;

        let encoded = tokio::task::spawn_blocking(move || ResultEncoder::default().encode(&result))
            .await
            .map_err(|e| ApiError::internal(format!("encoder task failed: {e}")))?
            .map_err(|e| ApiError::internal(e.to_string()))?;

        tracing::info!(
            faces_swapped = encoded.faces_swapped,
            enhanced = encoded.enhanced,
            "swap succeeded"
        );
        Ok(Json(SwapResponse {
            success: true,
            result: encoded,
        }))
    }
    .instrument(span)
    .await
}
