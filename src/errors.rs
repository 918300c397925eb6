use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Failure classes the HTTP surface distinguishes.
///
/// Provisioning conflicts (two requests creating the same tag table) never
/// show up here, the provisioner treats them as success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// No bucket fits, or a storage backend could not be reached.
    BucketUnavailable,
    /// Object, bucket or tag does not exist.
    NotFound,
    /// Malformed request: bad JSON or multipart shape, reserved tag.
    Validation,
    /// Upload succeeded but indexing did not.
    IndexingFailure,
    /// The transcoding service replied with something we could not parse.
    UpstreamDecode,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::BucketUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::IndexingFailure
            | ErrorKind::UpstreamDecode
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implemented by every component error so handlers can map it to a status.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Error returned from handlers, rendered as `{"operation": ..., "error": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub operation: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, operation: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            operation,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn validation(operation: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, operation, msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(operation: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, operation, msg)
    }

    /// Build from a classified component error.
    pub fn from_error<E>(operation: &'static str, err: E) -> Self
    where
        E: Classify + fmt::Display,
    {
        Self::new(err.kind().status(), operation, err.to_string())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation: {}, error: {}", self.operation, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(operation = self.operation, status = %self.status, "{}", self.message);
        } else {
            tracing::warn!(operation = self.operation, status = %self.status, "{}", self.message);
        }

        let body = Json(json!({
            "operation": self.operation,
            "error": self.message,
        }));

        (self.status, body).into_response()
    }
}

/// Attach the operation name to a component result at the handler boundary.
pub trait ResultExt<T> {
    fn op(self, operation: &'static str) -> Result<T, AppError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Classify + fmt::Display,
{
    fn op(self, operation: &'static str) -> Result<T, AppError> {
        self.map_err(|err| AppError::from_error(operation, err))
    }
}
