use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use screen_tracker::SendError;

/// Error returned by the HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Send(#[from] SendError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Send(SendError::AgentBusy) => StatusCode::CONFLICT,
            ApiError::Send(SendError::EmptyInput | SendError::UnsupportedOperation(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Send(SendError::ScreenSourceUnavailable(_)) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
