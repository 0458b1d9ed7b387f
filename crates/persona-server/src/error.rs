//! HTTP error handling and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use persona_engine::EngineError;
use serde_json::json;

/// Errors a request can fail with before its stream starts.
///
/// Everything after the first SSE byte is reported in-band as an `error`
/// event instead.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("unknown persona '{0}'")]
    UnknownPersona(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("server is shutting down")]
    ShuttingDown,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_type) = match &self {
            ServerError::UnknownPersona(_) => (StatusCode::NOT_FOUND, "not_found_error"),
            ServerError::InvalidRequest(_) | ServerError::Engine(EngineError::InvalidParams(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error")
            }
            ServerError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
            ServerError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "server_error"),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let cases = [
            (ServerError::UnknownPersona("x".into()), StatusCode::NOT_FOUND),
            (ServerError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                ServerError::Engine(EngineError::InvalidParams("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServerError::Engine(EngineError::Inference("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ServerError::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
