use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use platform_authz::AccessControlError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Shared handler result type.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("permission denied")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(String),
    #[error("bad request: {0}")]
    InvalidInput(String),
    #[error("internal server error")]
    Internal(Arc<anyhow::Error>),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self::Internal(Arc::new(err))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value)
    }
}

impl From<AccessControlError> for ApiError {
    fn from(err: AccessControlError) -> Self {
        if err.is_client_error() {
            return Self::InvalidInput(err.to_string());
        }
        Self::internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(source) = &self {
            error!(error = ?source, "request failed");
        }
        let body = ErrorBody {
            message: self.to_string(),
            code: self.code(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use platform_authz::StoreError;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn internal_errors_are_masked() {
        let err: ApiError =
            AccessControlError::Lookup(StoreError::Unavailable("db at 10.0.0.3 down".into()))
                .into();
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal server error");
        assert_eq!(body["code"], "INTERNAL");
    }

    #[tokio::test]
    async fn caller_mistakes_are_bad_requests() {
        let err: ApiError = AccessControlError::UnknownPermissionLevel("Owner".into()).into();
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "bad request: unknown permission level: Owner");
    }

    #[test]
    fn statuses_follow_the_variant() {
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("teams".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Unauthorized.code(), "UNAUTHORIZED");
        let cancelled: ApiError = AccessControlError::Cancelled.into();
        assert_eq!(cancelled.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
