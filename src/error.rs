use std::io;

use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::HeaderMapExt;
use thiserror::Error;

use crate::channel::{IoMode, SessionNotFound, SessionToken};
use crate::range::RangeNotSatisfiable;

/// Every way a request can fail. Implements [`IntoResponse`].
///
/// Error responses have an empty body and always carry `Content-Length`.
#[derive(Debug, Error)]
pub enum PoolHttpError {
    #[error("method {0} is not implemented")]
    NotImplemented(Method),

    #[error("request has no {0} query parameter")]
    MissingToken(String),

    #[error("no transfer session for token {0}")]
    UnknownSession(SessionToken),

    #[error("request path {requested} does not match transfer path {expected}")]
    PathMismatch { requested: String, expected: String },

    #[error("request path is not valid percent-encoded UTF-8")]
    InvalidPath,

    #[error("{method} is not allowed on a {mode} transfer")]
    ModeConflict { method: Method, mode: IoMode },

    #[error(transparent)]
    RangeNotSatisfiable(#[from] RangeNotSatisfiable),

    #[error("invalid response header: {0}")]
    InvalidHeader(String),

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl From<SessionNotFound> for PoolHttpError {
    fn from(SessionNotFound(token): SessionNotFound) -> Self {
        PoolHttpError::UnknownSession(token)
    }
}

impl PoolHttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            PoolHttpError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            PoolHttpError::MissingToken(_)
            | PoolHttpError::UnknownSession(_)
            | PoolHttpError::PathMismatch { .. }
            | PoolHttpError::InvalidPath => StatusCode::BAD_REQUEST,
            PoolHttpError::ModeConflict { .. } => StatusCode::METHOD_NOT_ALLOWED,
            PoolHttpError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            PoolHttpError::Io { source } if source.kind() == io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            PoolHttpError::Io { .. } | PoolHttpError::InvalidHeader(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PoolHttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        } else {
            tracing::debug!(%status, error = %self, "request rejected");
        }

        let mut response = status.into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        if let PoolHttpError::RangeNotSatisfiable(unsatisfiable) = &self {
            headers.remove(CONTENT_RANGE);
            headers.typed_insert(unsatisfiable.content_range());
        }
        response
    }
}
