//! Session lookup, method/mode checks, and the read and write paths.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use crate::channel::{Channel, IoMode, SessionToken, TransferService};
use crate::config::HandlerConfig;
use crate::error::PoolHttpError;
use crate::framing::{BoundaryGenerator, ResponseFraming};
use crate::negotiate::FileMetadata;
use crate::range::{RangeNotSatisfiable, RangeSet};
use crate::stream::FramedBody;

/// What the client wants to do with the session's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    /// The mode a session must have been opened in to allow this access.
    pub fn required_mode(self) -> IoMode {
        match self {
            Access::Read => IoMode::Read,
            Access::Write => IoMode::Write,
        }
    }
}

/// The parts of a request the router needs to find and check a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub method: Method,
    pub token: Option<SessionToken>,
    /// Percent-decoded request path.
    pub path: String,
}

/// Resolves session tokens and hands requests to the framer or the upload path.
#[derive(Clone)]
pub struct SessionRouter {
    service: Arc<dyn TransferService>,
    config: Arc<HandlerConfig>,
    boundaries: Arc<dyn BoundaryGenerator>,
}

impl std::fmt::Debug for SessionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRouter")
            .field("config", &self.config)
            .field("boundaries", &self.boundaries)
            .finish()
    }
}

impl SessionRouter {
    pub fn new(
        service: Arc<dyn TransferService>,
        config: Arc<HandlerConfig>,
        boundaries: Arc<dyn BoundaryGenerator>,
    ) -> Self {
        SessionRouter { service, config, boundaries }
    }

    /// Looks up the session and checks that it belongs to the requested path
    /// and was opened for `access`.
    pub async fn open(
        &self,
        request: &SessionRequest,
        access: Access,
    ) -> Result<Arc<dyn Channel>, PoolHttpError> {
        let token = request
            .token
            .as_ref()
            .ok_or_else(|| PoolHttpError::MissingToken(self.config.token_parameter.clone()))?;

        let channel = self.service.open(token, access == Access::Write).await?;

        if channel.path() != request.path {
            return Err(PoolHttpError::PathMismatch {
                requested: request.path.clone(),
                expected: channel.path().to_string(),
            });
        }

        let mode = channel.io_mode();
        if mode != access.required_mode() {
            return Err(PoolHttpError::ModeConflict { method: request.method.clone(), mode });
        }
        Ok(channel)
    }

    /// GET and HEAD. `range` is the first `Range` header of the request, if any.
    ///
    /// A HEAD response is framed exactly like a GET but no read is issued.
    pub async fn read(
        &self,
        request: &SessionRequest,
        range: Option<&HeaderValue>,
        head: bool,
    ) -> Result<Response, PoolHttpError> {
        let channel = self.open(request, Access::Read).await?;
        let metadata = FileMetadata {
            path: channel.path().to_string(),
            length: channel.size()?,
            checksums: channel.checksums(),
        };

        let ranges = range
            .map(|value| {
                let value = value
                    .to_str()
                    .map_err(|_| RangeNotSatisfiable { length: metadata.length })?;
                RangeSet::parse(value, metadata.length)
            })
            .transpose()?;

        let framing = ResponseFraming::new(
            &metadata,
            ranges.as_ref(),
            self.boundaries.as_ref(),
            self.config.framing_options(),
        )?;
        tracing::debug!(
            path = %metadata.path,
            status = %framing.status,
            content_length = framing.content_length(),
            ranges = ranges.as_ref().map_or(0, RangeSet::len),
            head,
            "serving read"
        );

        let ResponseFraming { status, headers, parts } = framing;
        let body = if head {
            Body::empty()
        } else {
            Body::new(FramedBody::new(parts, channel, self.config.chunk_size))
        };
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// PUT: streams the request body into the session's channel from offset 0,
    /// then answers 201.
    pub async fn write(
        &self,
        request: &SessionRequest,
        body: Body,
    ) -> Result<Response, PoolHttpError> {
        let channel = self.open(request, Access::Write).await?;

        let mut offset = 0u64;
        let mut data = body.into_data_stream();
        while let Some(chunk) = data.next().await {
            let chunk = chunk.map_err(io::Error::other)?;
            let len = chunk.len() as u64;
            channel.write_at(offset, chunk).await?;
            offset += len;
        }
        tracing::info!(path = %request.path, bytes = offset, "upload accepted");

        Ok((StatusCode::CREATED, [(CONTENT_LENGTH, HeaderValue::from_static("0"))]).into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    use crate::channel::{MemoryChannel, SessionTable};
    use crate::framing::FixedBoundary;

    const TOKEN: &str = "49571502-60ca-49cd-bfe4-306bfe68037c";

    fn router(channel: MemoryChannel) -> (SessionRouter, Arc<SessionTable>) {
        let table = Arc::new(SessionTable::new());
        table.insert(TOKEN.into(), Arc::new(channel));
        let router = SessionRouter::new(
            table.clone(),
            Arc::new(HandlerConfig::default()),
            Arc::new(FixedBoundary(0)),
        );
        (router, table)
    }

    fn request(method: Method, token: Option<&str>, path: &str) -> SessionRequest {
        SessionRequest { method, token: token.map(SessionToken::from), path: path.into() }
    }

    #[tokio::test]
    async fn open_checks_token_path_and_mode() {
        let (router, _) = router(MemoryChannel::reader("/path/to/file", "x"));

        assert_matches!(
            router.open(&request(Method::GET, None, "/path/to/file"), Access::Read).await,
            Err(PoolHttpError::MissingToken(p)) if p == "dcache-http-uuid"
        );
        assert_matches!(
            router.open(&request(Method::GET, Some("other"), "/path/to/file"), Access::Read).await,
            Err(PoolHttpError::UnknownSession(_))
        );
        assert_matches!(
            router
                .open(&request(Method::GET, Some(TOKEN), "/path/to/another-file"), Access::Read)
                .await,
            Err(PoolHttpError::PathMismatch { .. })
        );
        assert_matches!(
            router.open(&request(Method::PUT, Some(TOKEN), "/path/to/file"), Access::Write).await,
            Err(PoolHttpError::ModeConflict { mode: IoMode::Read, .. })
        );
        assert_matches!(
            router.open(&request(Method::GET, Some(TOKEN), "/path/to/file"), Access::Read).await,
            Ok(channel) if channel.path() == "/path/to/file"
        );
    }

    #[tokio::test]
    async fn read_with_undecodable_range_is_unsatisfiable() {
        let (router, _) = router(MemoryChannel::reader("/path/to/file", "0123456789"));
        let range = HeaderValue::from_bytes(b"bytes=0-\xff").unwrap();
        let result = router
            .read(&request(Method::GET, Some(TOKEN), "/path/to/file"), Some(&range), false)
            .await;
        assert_matches!(
            result,
            Err(PoolHttpError::RangeNotSatisfiable(RangeNotSatisfiable { length: 10 }))
        );
    }

    #[tokio::test]
    async fn write_stores_body() {
        let channel = Arc::new(MemoryChannel::writer("/path/to/file"));
        let table = Arc::new(SessionTable::new());
        table.insert(TOKEN.into(), channel.clone());
        let router = SessionRouter::new(
            table,
            Arc::new(HandlerConfig::default()),
            Arc::new(FixedBoundary(0)),
        );

        let response = router
            .write(
                &request(Method::PUT, Some(TOKEN), "/path/to/file"),
                Body::from("uploaded content"),
            )
            .await
            .unwrap();
        assert_eq!(StatusCode::CREATED, response.status());
        assert_eq!(&b"uploaded content"[..], &channel.contents()[..]);
    }
}
