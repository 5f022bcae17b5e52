use axum::{http::StatusCode, response::IntoResponse, Json};
use faas_orchestrator::Error;
use serde::Serialize;

/// JSON error body returned by every dispatcher endpoint.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            code: code.to_string(),
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", error)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::Unauthorized { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Error::FunctionNotFound(_) => (StatusCode::NOT_FOUND, "FUNCTION_NOT_FOUND"),
            Error::ReadinessTimeout { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "READINESS_TIMEOUT"),
            Error::AdmissionTimeout { .. } => (StatusCode::TOO_MANY_REQUESTS, "ADMISSION_TIMEOUT"),
            Error::NoInstance(_)
            | Error::NoReadyInstance(_)
            | Error::LaunchFailed { .. }
            | Error::ColdStartExhausted { .. } => (StatusCode::BAD_GATEWAY, "NO_INSTANCE"),
            Error::Forward { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Error::MonitorUnavailable | Error::MonitorAlreadyRunning | Error::ShuttingDown => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
            }
            Error::InvalidConfig(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INVALID_CONFIG"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self)).into_response()
    }
}
