use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::error::RelayError;

/// Sentinel carrying an explicit HTTP 400 through the `anyhow::Error` chain
/// for input problems that are not a `RelayError`.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }
}

fn status_for(e: &RelayError) -> StatusCode {
    match e {
        RelayError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        RelayError::UnknownCapability(_)
        | RelayError::InvalidConfig(_)
        | RelayError::NotInitialized => StatusCode::BAD_REQUEST,
        RelayError::InvalidTransition { .. } => StatusCode::CONFLICT,
        RelayError::WorkerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::WorkerInvocation(_)
        | RelayError::Journal(_)
        | RelayError::Io(_)
        | RelayError::Yaml(_)
        | RelayError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.downcast_ref::<BadRequestError>().is_some() {
            StatusCode::BAD_REQUEST
        } else if let Some(e) = self.0.downcast_ref::<RelayError>() {
            status_for(e)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
