use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::state::StopError;
use common::LogQueryError;

/// Errores del API HTTP del Job Server.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn job_not_found(id: common::JobId) -> Self {
        ApiError::NotFound(format!("job {id} not found"))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Internal(e) = &self {
            error!("error interno: {e:#}");
        }
        (status, Json(json!({ "error": format!("{self:#}") }))).into_response()
    }
}

impl From<StopError> for ApiError {
    fn from(e: StopError) -> Self {
        match e {
            StopError::NotFound(_) => ApiError::NotFound(e.to_string()),
            StopError::AlreadyTerminal { .. } => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<LogQueryError> for ApiError {
    fn from(e: LogQueryError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}
