use axum::{Json, http::StatusCode, response::IntoResponse};
use imago::{access::AccessError, app::AppError, database::DatabaseError, storage::StorageError};
use serde::Serialize;

/// The error taxonomy every handler funnels into.
///
/// Denial and not-found stay distinct on purpose: a 403 means the key is
/// known but not allowed, a 404 means the addressed entity does not exist.
/// Backend failures always surface as 500, never as an empty result or a
/// denial.
pub enum ApiError {
    /// Malformed request parameters.
    BadRequest(String),

    /// The request carries no public key to authenticate as.
    MissingPublicKey,

    /// The requester is not allowed to perform the operation.
    AccessDenied,

    /// The addressed entity does not exist.
    NotFound(String),

    /// A backing store failed.
    Internal(String),
}

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        match value {
            AppError::Storage(e) => e.into(),
            AppError::Database(e) => e.into(),
            AppError::ImageNotFound { identifier } => {
                ApiError::NotFound(format!("image not found: {identifier}"))
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::InvalidPublicKey { public_key } => {
                ApiError::BadRequest(format!("invalid public key: {public_key}"))
            }
            StorageError::UnsupportedFile { .. } => {
                ApiError::BadRequest("unsupported or unrecognized file format".to_string())
            }
            StorageError::FileNotFound { identifier } => {
                ApiError::NotFound(format!("image not found: {identifier}"))
            }
            StorageError::Io(e) => ApiError::Internal(e.to_string()),
            StorageError::Image(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(value: DatabaseError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

impl From<AccessError> for ApiError {
    fn from(value: AccessError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::MissingPublicKey => (
                StatusCode::UNAUTHORIZED,
                "missing public key".to_string(),
            ),
            ApiError::AccessDenied => (StatusCode::FORBIDDEN, "access denied".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                tracing::error!(%msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}
