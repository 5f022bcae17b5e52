use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::Response,
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use faas_orchestrator::{AdmissionLimiter, Dispatcher, InstancePool};
use faas_usage_tracker::UsageTracker;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::instrument;

pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;

use auth::caller_identity;
use error::ApiError;
use proxy::HttpProxy;

/// Largest request body accepted for forwarding.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub proxy: Arc<HttpProxy>,
    pub usage: Arc<UsageTracker>,
}

impl AppState {
    fn pool(&self) -> &Arc<InstancePool> {
        self.dispatcher.pool()
    }

    fn limiter(&self) -> &Arc<AdmissionLimiter> {
        self.dispatcher.limiter()
    }
}

#[derive(Debug, Serialize)]
pub struct FunctionStatus {
    pub function: String,
    pub instances: Vec<String>,
    pub ready: usize,
    pub busy_ms: u64,
    pub in_flight: usize,
    pub capacity: usize,
}

/// One route per registered function plus the dispatcher's own endpoints.
pub fn create_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/functions", get(list_functions_handler))
        .route("/api/v1/usage/:caller", get(usage_handler));

    for function in state.pool().functions() {
        let path = format!("/{function}");
        router = router.route(
            &path,
            any(move |State(state): State<AppState>, request: Request| {
                let function = function.clone();
                async move { invoke_handler(state, function, request).await }
            }),
        );
    }

    router
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found_handler(uri: axum::http::Uri) -> ApiError {
    ApiError::new(
        axum::http::StatusCode::NOT_FOUND,
        "FUNCTION_NOT_FOUND",
        format!("No function registered at {}", uri.path()),
    )
}

#[instrument(skip(state, request), fields(function = %function))]
async fn invoke_handler(
    state: AppState,
    function: String,
    request: Request,
) -> Result<Response<Body>, ApiError> {
    let caller = caller_identity(request.headers())?;
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read request body: {e}")))?;

    let proxy = state.proxy.clone();
    let response = state
        .dispatcher
        .dispatch(&caller, &function, |instance| async move {
            proxy
                .forward(
                    &instance,
                    parts.method,
                    parts.uri.query(),
                    &parts.headers,
                    body,
                )
                .await
        })
        .await?;
    Ok(response)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "functions": state.pool().functions().len(),
        "teardown_failures": state.pool().teardown_failures(),
    }))
}

async fn list_functions_handler(State(state): State<AppState>) -> Json<Vec<FunctionStatus>> {
    let snapshot = state.pool().snapshot().await;
    let statuses = snapshot
        .into_iter()
        .map(|stats| FunctionStatus {
            in_flight: state.limiter().current_count(&stats.function),
            capacity: state.limiter().capacity(&stats.function),
            function: stats.function,
            instances: stats.instances,
            ready: stats.ready,
            busy_ms: stats.busy_ms,
        })
        .collect();
    Json(statuses)
}

async fn usage_handler(
    State(state): State<AppState>,
    Path(caller): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.usage.caller_usage(&caller).await {
        Ok(usage) => Ok(Json(usage)),
        Err(faas_usage_tracker::UsageError::CallerNotFound(_)) => Err(ApiError::new(
            axum::http::StatusCode::NOT_FOUND,
            "CALLER_NOT_FOUND",
            format!("No usage recorded for {caller}"),
        )),
        Err(e) => Err(ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "USAGE_ERROR",
            e.to_string(),
        )),
    }
}
