use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

/// Error type shared by the governance modules. Mapped onto HTTP status
/// codes by the `IntoResponse` impl; handlers return `GovResult<Json<T>>`.
#[derive(Debug, thiserror::Error)]
pub enum GovError {
    #[error("Permission denied: {0}")]
    Permission(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type GovResult<T> = Result<T, GovError>;

impl IntoResponse for GovError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            Self::Permission(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Database(msg) | Self::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<diesel::result::Error> for GovError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => Self::NotFound("record not found".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for GovError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for GovError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_rows_map_to_not_found() {
        let e: GovError = diesel::result::Error::NotFound.into();
        assert!(matches!(e, GovError::NotFound(_)));
    }
}
