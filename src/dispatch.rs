//! Top-level request entry point.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::RANGE;
use axum::http::{Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::Instrument;

use crate::channel::{SessionToken, TransferService};
use crate::config::HandlerConfig;
use crate::error::PoolHttpError;
use crate::framing::{BoundaryGenerator, RandomBoundary};
use crate::negotiate::decode_path;
use crate::session::{SessionRequest, SessionRouter};

/// HTTP methods as the handler classifies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Head,
    Put,
    Delete,
    Options,
    Connect,
    Patch,
    Post,
    Trace,
    Other,
}

impl From<&Method> for RequestMethod {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => RequestMethod::Get,
            Method::HEAD => RequestMethod::Head,
            Method::PUT => RequestMethod::Put,
            Method::DELETE => RequestMethod::Delete,
            Method::OPTIONS => RequestMethod::Options,
            Method::CONNECT => RequestMethod::Connect,
            Method::PATCH => RequestMethod::Patch,
            Method::POST => RequestMethod::Post,
            Method::TRACE => RequestMethod::Trace,
            _ => RequestMethod::Other,
        }
    }
}

/// Answers every request for a pool's transfer sessions.
///
/// ```no_run
/// use std::sync::Arc;
/// use pool_http::{HandlerConfig, PoolRequestHandler, SessionTable};
///
/// # async fn serve() -> std::io::Result<()> {
/// let sessions = Arc::new(SessionTable::new());
/// let app = PoolRequestHandler::new(sessions, HandlerConfig::default()).into_router();
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
/// axum::serve(listener, app).await
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PoolRequestHandler {
    router: SessionRouter,
    config: Arc<HandlerConfig>,
}

impl PoolRequestHandler {
    pub fn new(service: Arc<dyn TransferService>, config: HandlerConfig) -> Self {
        Self::with_boundaries(service, config, Arc::new(RandomBoundary))
    }

    /// Like [`PoolRequestHandler::new`], with a caller-chosen source of
    /// multipart boundaries.
    pub fn with_boundaries(
        service: Arc<dyn TransferService>,
        config: HandlerConfig,
        boundaries: Arc<dyn BoundaryGenerator>,
    ) -> Self {
        let config = Arc::new(config);
        PoolRequestHandler {
            router: SessionRouter::new(service, config.clone(), boundaries),
            config,
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub async fn handle(&self, request: Request) -> Response {
        let span = tracing::debug_span!(
            "request",
            method = %request.method(),
            path = request.uri().path(),
        );
        async move {
            match self.try_handle(request).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        }
        .instrument(span)
        .await
    }

    async fn try_handle(&self, request: Request) -> Result<Response, PoolHttpError> {
        let method = RequestMethod::from(request.method());
        match method {
            RequestMethod::Get | RequestMethod::Head => {
                let session = self.session_request(request.method(), request.uri())?;
                let range = request.headers().get(RANGE);
                self.router
                    .read(&session, range, method == RequestMethod::Head)
                    .await
            }
            RequestMethod::Put => {
                let session = self.session_request(request.method(), request.uri())?;
                self.router.write(&session, request.into_body()).await
            }
            RequestMethod::Delete
            | RequestMethod::Options
            | RequestMethod::Connect
            | RequestMethod::Patch
            | RequestMethod::Post
            | RequestMethod::Trace
            | RequestMethod::Other => Err(PoolHttpError::NotImplemented(request.method().clone())),
        }
    }

    fn session_request(&self, method: &Method, uri: &Uri) -> Result<SessionRequest, PoolHttpError> {
        let path = decode_path(uri.path()).ok_or(PoolHttpError::InvalidPath)?;
        let token = uri
            .query()
            .and_then(|query| query_parameter(query, &self.config.token_parameter))
            .map(SessionToken::new);
        Ok(SessionRequest { method: method.clone(), token, path })
    }

    /// Routes every path and method to [`PoolRequestHandler::handle`].
    pub fn into_router(self) -> Router {
        Router::new().fallback(move |request: Request<Body>| async move {
            self.handle(request).await
        })
    }
}

/// First value of `name` in a query string. An unparseable query has no
/// parameters.
fn query_parameter(query: &str, name: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    pairs.into_iter().find(|(key, _)| key == name).map(|(_, value)| value)
}
