use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rolebase_core::StoreError;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<&'static str>,
}

/// `application/problem+json` error body.
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
                errors: Vec::new(),
            },
        }
    }

    pub fn unauthorized<S: Into<String>>(problem_type: &'static str, detail: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, problem_type, detail)
    }

    pub fn forbidden<S: Into<String>>(problem_type: &'static str, detail: S) -> Self {
        Self::new(StatusCode::FORBIDDEN, problem_type, detail)
    }

    fn with_errors(mut self, errors: Vec<&'static str>) -> Self {
        self.body.errors = errors;
        self
    }
}

impl From<StoreError> for ProblemResponse {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Validation(violations) => {
                let codes = violations.iter().map(|v| v.code()).collect();
                Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "validation_failed",
                    err.to_string(),
                )
                .with_errors(codes)
            }
            StoreError::Conflict(detail) => {
                Self::new(StatusCode::CONFLICT, "conflict", detail.clone())
            }
            StoreError::Reference(detail) => {
                Self::new(StatusCode::NOT_FOUND, "unknown_reference", detail.clone())
            }
            StoreError::Unavailable(source) => {
                error!(stage = "http", error = %source, "store unavailable");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    "the account store is unavailable",
                )
            }
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
