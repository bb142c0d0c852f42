//! # pool-http
//!
//! HTTP data-plane endpoint of a storage pool, built on [`axum`][1].
//!
//! A client that was redirected to the pool presents a transfer session token
//! as a query parameter. The handler looks the session up through a
//! [`TransferService`], checks that the request path and method agree with
//! the session, and then either serves the file (whole, a single byte range,
//! or `multipart/byteranges`) or accepts an upload into it.
//!
//! Storage is reached only through the [`Channel`] trait. [`FileChannel`]
//! serves local files; [`MemoryChannel`] and [`SessionTable`] are in-memory
//! implementations for tests and small deployments.
//!
//! ```
//! use std::sync::Arc;
//!
//! use axum::body::{to_bytes, Body};
//! use axum::http::{Request, StatusCode};
//! use pool_http::{HandlerConfig, MemoryChannel, PoolRequestHandler, SessionTable};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sessions = Arc::new(SessionTable::new());
//! let channel = MemoryChannel::reader("/data/hello.txt", "hello world");
//! sessions.insert("abc".into(), Arc::new(channel));
//! let handler = PoolRequestHandler::new(sessions, HandlerConfig::default());
//!
//! let request = Request::get("/data/hello.txt?dcache-http-uuid=abc")
//!     .header("Range", "bytes=6-")
//!     .body(Body::empty())
//!     .unwrap();
//! let response = handler.handle(request).await;
//! assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
//! assert_eq!("bytes 6-10/11", response.headers()["Content-Range"]);
//! assert_eq!(&b"world"[..], &to_bytes(response.into_body(), usize::MAX).await.unwrap()[..]);
//! # }
//! ```
//!
//! [1]: https://docs.rs/axum

mod channel;
mod config;
mod dispatch;
mod error;
mod file;
mod framing;
mod negotiate;
mod range;
mod session;
mod stream;

pub use channel::{
    ByteStream, Channel, Checksum, ChecksumType, IoMode, MemoryChannel, SessionNotFound,
    SessionTable, SessionToken, TransferService,
};
pub use config::{ConfigError, HandlerConfig, DEFAULT_CHUNK_SIZE, DEFAULT_TOKEN_PARAMETER};
pub use dispatch::{PoolRequestHandler, RequestMethod};
pub use error::PoolHttpError;
pub use file::FileChannel;
pub use framing::{
    boundary_from_seed, BodyPart, BoundaryGenerator, FixedBoundary, FramingOptions,
    RandomBoundary, ResponseFraming, DIGEST,
};
pub use negotiate::{decode_path, encode_disposition, Disposition, FileMetadata};
pub use range::{ByteRange, RangeNotSatisfiable, RangeSet};
pub use session::{Access, SessionRequest, SessionRouter};
pub use stream::{AsyncSeekStart, FramedBody, RangedStream};
