//! API error types with structured JSON responses.
//!
//! `/upload` and `/download` failures use `{ "error": "…" }`; `/api/parse`
//! failures add `"success": false` (see [`ParseApiError`]).

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::PipelineError;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub error: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Processing failed: {0}")]
    Processing(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail.clone()),
            ApiError::UnsupportedMediaType(detail) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, detail.clone())
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail.clone()),
            ApiError::PayloadTooLarge(detail) => (StatusCode::PAYLOAD_TOO_LARGE, detail.clone()),
            ApiError::Processing(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error processing file: {detail}"),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        }
    }

    fn respond(self, success: Option<bool>) -> Response {
        let (status, error) = self.status_and_message();
        (status, Json(ErrorBody { success, error })).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.respond(None)
    }
}

/// [`ApiError`] rendered in the `/api/parse` envelope (`success: false`).
#[derive(Debug)]
pub struct ParseApiError(pub ApiError);

impl IntoResponse for ParseApiError {
    fn into_response(self) -> Response {
        self.0.respond(Some(false))
    }
}

impl From<ApiError> for ParseApiError {
    fn from(err: ApiError) -> Self {
        ParseApiError(err)
    }
}

impl From<PipelineError> for ParseApiError {
    fn from(err: PipelineError) -> Self {
        ParseApiError(err.into())
    }
}

impl From<MultipartError> for ParseApiError {
    fn from(err: MultipartError) -> Self {
        ParseApiError(err.into())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            e @ PipelineError::MissingUpload { .. } => ApiError::BadRequest(e.to_string()),
            e @ PipelineError::InvalidFilename { .. } => ApiError::BadRequest(e.to_string()),
            e @ PipelineError::UnsupportedMediaType { .. } => {
                ApiError::UnsupportedMediaType(e.to_string())
            }
            e @ PipelineError::ArtifactNotFound { .. } => ApiError::NotFound(e.to_string()),
            PipelineError::StageExecution {
                program,
                args,
                stderr,
                cause,
            } => {
                tracing::error!(
                    %program,
                    args = ?args,
                    stderr = %stderr.trim(),
                    "stage execution failed: {cause}"
                );
                ApiError::Processing(format!("stage '{program}' {cause}"))
            }
            e @ PipelineError::OutputNotProduced { .. } => {
                tracing::error!("{e}");
                ApiError::Processing("output table was not generated".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        match err.status() {
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(format!(
                "Upload exceeds the size limit: {}",
                err.body_text()
            )),
            _ => ApiError::BadRequest(format!("Malformed multipart body: {}", err.body_text())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageFailure;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn unsupported_media_type_returns_415() {
        let err: ApiError = PipelineError::UnsupportedMediaType {
            declared: "image/png".into(),
            expected: "application/pdf".into(),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("image/png"));
        assert!(json.get("success").is_none());
    }

    #[tokio::test]
    async fn stage_failure_hides_stderr() {
        let err: ApiError = PipelineError::StageExecution {
            program: "python3".into(),
            args: vec![],
            stderr: "secret traceback".into(),
            cause: StageFailure::NonZeroExit { code: Some(1) },
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        let msg = json["error"].as_str().unwrap();
        assert!(msg.starts_with("Error processing file:"), "got: {msg}");
        assert!(!msg.contains("secret traceback"));
    }

    #[tokio::test]
    async fn parse_envelope_sets_success_false() {
        let err = ParseApiError::from(PipelineError::MissingUpload {
            field: "pdfFile".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("pdfFile"));
    }

    #[tokio::test]
    async fn not_found_returns_404() {
        let err: ApiError = PipelineError::ArtifactNotFound {
            name: "x.csv".into(),
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let err: ApiError = PipelineError::io(
            "Failed to save upload",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        )
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "An internal error occurred");
    }
}
