use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use verso_api::SourceError;
use verso_infra::cache::CacheError;
use verso_service::content::RepositoryError;

#[derive(Error, Debug)]
pub enum VersoError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl VersoError {
    fn status(&self) -> StatusCode {
        match self {
            VersoError::NotFound(_) => StatusCode::NOT_FOUND,
            VersoError::Repository(RepositoryError::Cache(CacheError::GateTimeout { .. })) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            VersoError::Repository(RepositoryError::Source(SourceError::Conflict { .. })) => {
                StatusCode::CONFLICT
            }
            VersoError::Repository(RepositoryError::Source(SourceError::NotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for VersoError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (
            status,
            Json(serde_json::json!({
                "status": "error",
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, VersoError>;
