//! Mapping of domain errors onto HTTP responses.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::WithRejection;
use serde_json::json;
use tracing::error;

use crate::business_store::StoreError;
use crate::export::ExportError;
use crate::jobs::{JobError, PipelineError};
use crate::log_tail::LogTailError;

/// An error rendered as `{"error": message}` with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON body whose rejection renders as an [`ApiError`].
pub type ApiJson<T> = WithRejection<Json<T>, ApiError>;

/// Query string whose rejection renders as an [`ApiError`].
pub type ApiQuery<T> = WithRejection<Query<T>, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let status = match &err {
            JobError::AlreadyRunning(_) => StatusCode::CONFLICT,
            JobError::NotRunning(_) | JobError::TaskNotRunning(_) | JobError::InvalidParams(_) => {
                StatusCode::BAD_REQUEST
            }
            JobError::Spawn { .. } | JobError::Io(_) | JobError::Store(_) | JobError::Watcher(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnknownCity(_) => Self::bad_request(err.to_string()),
            PipelineError::Job(err) => err.into(),
            PipelineError::Store(err) => err.into(),
            PipelineError::StepFailed { .. } => Self::internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::InvalidId(_)
            | StoreError::InvalidCollection(_)
            | StoreError::InvalidUpdate(_)
            | StoreError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::Database(_) | StoreError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<LogTailError> for ApiError {
    fn from(err: LogTailError) -> Self {
        let status = match &err {
            LogTailError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            LogTailError::NotFound(_) | LogTailError::NoLogs(_) => StatusCode::NOT_FOUND,
            LogTailError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        let status = match &err {
            ExportError::InvalidType | ExportError::InvalidFormat => StatusCode::BAD_REQUEST,
            ExportError::Csv(_) | ExportError::Json(_) | ExportError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

// Malformed input is a 400 whatever status axum picked.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
