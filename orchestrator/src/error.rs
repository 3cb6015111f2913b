//! API error taxonomy and its HTTP mapping.
//!
//! Four failure classes cross the API boundary: bad input (rejected before
//! the store or dispatcher is touched), missing resources, an absent compute
//! backend capability, and storage failures. Dispatch failures never surface
//! here — repo intake logs them and continues the batch.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::compute::DispatchError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("session {0} not found")]
    SessionNotFound(i64),

    #[error("{0}")]
    NotFound(String),

    /// The compute backend capability is not configured on this deployment.
    #[error("compute backend not available")]
    ComputeUnavailable,

    /// Storage failures are hard failures: silently losing a result is
    /// worse than failing the request.
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ComputeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotFound(name) => Self::NotFound(format!("job {name} not found")),
            other => Self::Internal(other.to_string()),
        }
    }
}
