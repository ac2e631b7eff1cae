use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::poller::ReadOnceError;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.message }))).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let (status, message) = map_db_error(err);
        Self::new(status, message)
    }
}

impl From<ReadOnceError> for AppError {
    fn from(err: ReadOnceError) -> Self {
        match err {
            ReadOnceError::Device(err) => {
                tracing::warn!(error = %err, "modbus on-demand read failed");
                Self::bad_gateway(err.to_string())
            }
            ReadOnceError::Persist(err) => {
                tracing::error!(error = %err, "failed to persist on-demand reading");
                Self::internal(format!("insert error: {err}"))
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn map_db_error(err: sqlx::Error) -> (StatusCode, String) {
    let status = match &err {
        sqlx::Error::RowNotFound => StatusCode::NOT_FOUND,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("22P02") => StatusCode::BAD_REQUEST, // invalid_text_representation
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    tracing::error!(error = %err, status = %status, "database error");

    let message = match status {
        StatusCode::NOT_FOUND => "Resource not found",
        StatusCode::SERVICE_UNAVAILABLE => "Database unavailable",
        StatusCode::BAD_REQUEST => "Invalid request",
        _ => "Database error",
    };

    (status, message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::DeviceError;

    #[test]
    fn device_failures_map_to_bad_gateway_with_reason() {
        let err: AppError = ReadOnceError::Device(DeviceError::Connection {
            endpoint: "10.0.0.5:502".to_string(),
            reason: "connection refused".to_string(),
        })
        .into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.starts_with("connection error:"));

        let err: AppError =
            ReadOnceError::Device(DeviceError::Read("illegal data address".to_string())).into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.starts_with("read error:"));
    }

    #[test]
    fn persist_failures_map_to_internal_error() {
        let err: AppError = ReadOnceError::Persist(sqlx::Error::PoolTimedOut).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn pool_exhaustion_is_unavailable() {
        let (status, message) = map_db_error(sqlx::Error::PoolTimedOut);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(message, "Database unavailable");
    }
}
