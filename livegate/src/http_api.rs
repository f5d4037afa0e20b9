// livegate/src/http_api.rs
//
// HTTP surface.
//
// Endpoints:
//   GET  /version                     build version + update id (text)
//   GET  /status                      license status line (text)
//   POST /process?base64=0|1          liveness check (JSON verdict)
//   GET  /metrics                     Prometheus text exposition
//   OPTIONS *                         CORS preflight, empty 200
//   anything else                     "Not found" (text, 200)
//
// Every response carries permissive CORS headers, error responses included.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::metrics::Gauges;
use crate::pipeline::{ImageUpload, Outcome, PipelineError, RequestPipeline};
use crate::status::StatusReporter;

pub const PLEASE_INPUT_LICENSE: &str = "Please input license.";
pub const NOT_FOUND: &str = "Not found";

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RequestPipeline>,
    pub status:   StatusReporter,
}

impl AppState {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        let status = StatusReporter::new(pipeline.license().clone());
        Self { pipeline, status }
    }
}

pub fn router(state: AppState) -> Router {
    let max_body = state.pipeline.max_body();
    Router::new()
        .route("/version", get(version_handler))
        .route("/status", get(status_handler))
        .route("/process", post(process_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(middleware::from_fn(preflight))
        .layer(middleware::map_response(with_cors))
        .with_state(state)
}

// ── Middleware ────────────────────────────────────────────────────────────────

async fn preflight(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

async fn with_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    response
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn version_handler(State(state): State<AppState>) -> String {
    state.status.version()
}

async fn status_handler(State(state): State<AppState>) -> String {
    state.status.status()
}

async fn not_found_handler() -> &'static str {
    NOT_FOUND
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = &state.pipeline;
    let license = pipeline.license().snapshot();
    let gauges = Gauges {
        engine_generation:  pipeline.engine().generation(),
        engine_recreations: pipeline.engine().recreations(),
        license_valid:      license.status.as_ref().is_some_and(|s| s.is_valid()),
        license_refreshes:  license.version,
    };
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        pipeline.metrics().prometheus_text(gauges),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessQuery {
    base64: Option<String>,
}

impl ProcessQuery {
    /// `base64=1` or `base64=true` selects the JSON upload; anything else is
    /// multipart.
    pub fn wants_base64(&self) -> bool {
        match self.base64.as_deref().map(str::trim) {
            Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
            None    => false,
        }
    }
}

async fn process_handler(
    State(state): State<AppState>,
    query: Result<Query<ProcessQuery>, QueryRejection>,
    request: Request<Body>,
) -> Response {
    // An unparsable query string means multipart, like an absent one.
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "query string ignored");
            ProcessQuery::default()
        }
    };
    let upload = if query.wants_base64() {
        ImageUpload::Base64Json(request)
    } else {
        match Multipart::from_request(request, &()).await {
            Ok(multipart) => ImageUpload::Multipart(multipart),
            Err(rejection) => ImageUpload::Rejected(rejection.body_text()),
        }
    };

    match state.pipeline.check_liveness(upload).await {
        Ok(Outcome::Unlicensed) => PLEASE_INPUT_LICENSE.into_response(),
        Ok(Outcome::Report(report)) => match serde_json::to_string(&report) {
            Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
            Err(e)   => conflict(&state, PipelineError::from(e)),
        },
        Err(e) => conflict(&state, e),
    }
}

fn conflict(state: &AppState, error: PipelineError) -> Response {
    warn!(error = %error, "request failed");
    state.pipeline.metrics().record_conflict();
    (StatusCode::CONFLICT, Json(serde_json::json!({ "error": error.to_string() }))).into_response()
}
