use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use reposerve_store::StoreError;
use reposerve_types::TypeError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bad path: {0}")]
    BadPath(String),

    #[error("invalid object path: {0}")]
    InvalidName(#[from] TypeError),

    #[error("object already exists: {0}")]
    Conflict(String),

    #[error("repository is append-only: cannot delete {0}")]
    AppendOnly(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(u64),

    #[error("could not read request body: {0}")]
    BodyRead(String),

    #[error("range not satisfiable for a {size} byte object")]
    RangeNotSatisfiable { size: u64 },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadPath(_) | Self::InvalidName(_) | Self::BodyRead(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::AppendOnly(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Store(e) => match e {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::AlreadyExists(_) => StatusCode::FORBIDDEN,
                StoreError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                StoreError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
                StoreError::Io(_) | StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Client errors carry their message; server errors only the reason phrase.
impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let content_range = match &self {
            Self::RangeNotSatisfiable { size } => {
                HeaderValue::from_str(&format!("bytes */{size}")).ok()
            }
            _ => None,
        };
        let body = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            status.canonical_reason().unwrap_or("error").to_string()
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
            self.to_string()
        };
        let mut response = (status, body).into_response();
        if let Some(value) = content_range {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        response
    }
}
