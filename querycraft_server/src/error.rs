use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use querycraft_core::error as core_error;
use serde::Serialize;

/// Error body shared by every endpoint: a human-readable `message` and the
/// raw `error` string, source chain included.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] querycraft_core::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ApiError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::Core(core_error::Error::NotFound(msg.into()))
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Core(core_error::Error::Forbidden(msg.into()))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(err) => match err {
                core_error::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                core_error::Error::NotFound(_) => StatusCode::NOT_FOUND,
                core_error::Error::Conflict(_) => StatusCode::CONFLICT,
                core_error::Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                core_error::Error::Forbidden(_) => StatusCode::FORBIDDEN,
                core_error::Error::Backend { .. } | core_error::Error::BackendMessage(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },
        }
    }

    /// The message without the core error's kind prefix.
    fn message(&self) -> String {
        match self {
            ApiError::Core(err) => match err {
                core_error::Error::InvalidInput(m)
                | core_error::Error::NotFound(m)
                | core_error::Error::Conflict(m)
                | core_error::Error::Unauthorized(m)
                | core_error::Error::Forbidden(m)
                | core_error::Error::BackendMessage(m) => m.clone(),
                core_error::Error::Backend { .. } => err.to_string(),
            },
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::error!(status = code.as_u16(), error = %self, "request failed");
        }
        let body = ErrorBody {
            message: self.message(),
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (ApiError::invalid("x"), StatusCode::BAD_REQUEST),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND),
            (ApiError::forbidden("x"), StatusCode::FORBIDDEN),
            (
                ApiError::Core(core_error::Error::Conflict("x".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Core(core_error::Error::BackendMessage("x".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status);
        }
    }

    #[test]
    fn message_drops_prefix_and_error_keeps_raw_text() {
        let err = ApiError::not_found("Connection not found");
        assert_eq!(err.message(), "Connection not found");
        assert_eq!(err.to_string(), "not found: Connection not found");

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ApiError::Core(core_error::Error::backend("source query", io));
        assert_eq!(err.to_string(), "backend error: source query: refused");
    }

    #[tokio::test]
    async fn body_carries_message_and_raw_error() {
        let resp = ApiError::forbidden("Only organization admins can perform this action")
            .into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "message": "Only organization admins can perform this action",
                "error": "forbidden: Only organization admins can perform this action",
            })
        );
    }
}
