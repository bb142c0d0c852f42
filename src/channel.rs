//! Contracts of the transfer service and of the storage channels it hands out.
//!
//! The endpoint never owns a channel: it looks one up by session token once per
//! request, reads its metadata, and streams positioned reads from it. The
//! [`SessionTable`] and [`MemoryChannel`] types are reference implementations
//! used by the demo server and the tests.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::range::ByteRange;

/// Stream of chunks produced by a positioned read.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Direction a transfer session was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    Read,
    Write,
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMode::Read => f.write_str("read"),
            IoMode::Write => f.write_str("write"),
        }
    }
}

/// Checksum algorithms a pool may have recorded for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Adler32,
    Md4,
    Md5,
}

impl ChecksumType {
    /// Lower-case algorithm name as used in a `Digest` header.
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumType::Adler32 => "adler32",
            ChecksumType::Md4 => "md4",
            ChecksumType::Md5 => "md5",
        }
    }
}

/// A precomputed checksum value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub kind: ChecksumType,
    pub value: String,
}

impl Checksum {
    pub fn new(kind: ChecksumType, value: impl Into<String>) -> Self {
        Checksum { kind, value: value.into() }
    }
}

/// Storage-side handle of one transfer session.
///
/// Reads carry their absolute offsets, so a read-mode channel may serve any
/// number of concurrent reads over disjoint or overlapping ranges.
#[async_trait]
pub trait Channel: Send + Sync + fmt::Debug {
    /// Current size of the file in bytes.
    fn size(&self) -> io::Result<u64>;

    fn io_mode(&self) -> IoMode;

    /// Logical path the transfer was organised for.
    fn path(&self) -> &str;

    /// Checksums known for the file, possibly none.
    fn checksums(&self) -> Vec<Checksum>;

    /// Streams the bytes of `range` in chunks of at most `chunk_size` bytes.
    fn read_range(&self, range: ByteRange, chunk_size: usize) -> ByteStream;

    /// Writes `data` at `offset`. Only meaningful on write-mode channels.
    async fn write_at(&self, offset: u64, data: Bytes) -> io::Result<()>;
}

/// Opaque token of a transfer session, as carried in the request query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        SessionToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(token: &str) -> Self {
        SessionToken::new(token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no transfer session for token {0}")]
pub struct SessionNotFound(pub SessionToken);

/// Maps session tokens to the channels the pool organised for them.
#[async_trait]
pub trait TransferService: Send + Sync {
    async fn open(
        &self,
        token: &SessionToken,
        for_write: bool,
    ) -> Result<Arc<dyn Channel>, SessionNotFound>;
}

/// In-memory [`TransferService`] keyed by token.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<SessionToken, Arc<dyn Channel>>,
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable::default()
    }

    /// Binds `channel` to `token`, replacing any previous binding.
    pub fn insert(&self, token: SessionToken, channel: Arc<dyn Channel>) {
        tracing::debug!(
            %token,
            path = channel.path(),
            mode = %channel.io_mode(),
            "session registered"
        );
        self.sessions.insert(token, channel);
    }

    pub fn remove(&self, token: &SessionToken) -> Option<Arc<dyn Channel>> {
        self.sessions.remove(token).map(|(_, channel)| channel)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl TransferService for SessionTable {
    async fn open(
        &self,
        token: &SessionToken,
        _for_write: bool,
    ) -> Result<Arc<dyn Channel>, SessionNotFound> {
        self.sessions
            .get(token)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionNotFound(token.clone()))
    }
}

/// A [`Channel`] over bytes held in memory.
#[derive(Debug)]
pub struct MemoryChannel {
    path: String,
    mode: IoMode,
    checksums: Vec<Checksum>,
    data: Mutex<BytesMut>,
}

impl MemoryChannel {
    /// A read-mode channel serving `data`.
    pub fn reader(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        MemoryChannel {
            path: path.into(),
            mode: IoMode::Read,
            checksums: Vec::new(),
            data: Mutex::new(BytesMut::from(&data[..])),
        }
    }

    /// An empty write-mode channel.
    pub fn writer(path: impl Into<String>) -> Self {
        MemoryChannel {
            path: path.into(),
            mode: IoMode::Write,
            checksums: Vec::new(),
            data: Mutex::new(BytesMut::new()),
        }
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksums.push(checksum);
        self
    }

    /// Copy of the current content.
    pub fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, BytesMut> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn size(&self) -> io::Result<u64> {
        Ok(self.lock().len() as u64)
    }

    fn io_mode(&self) -> IoMode {
        self.mode
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn checksums(&self) -> Vec<Checksum> {
        self.checksums.clone()
    }

    fn read_range(&self, range: ByteRange, chunk_size: usize) -> ByteStream {
        let data = self.lock();
        let end = usize::try_from(range.end_exclusive).unwrap_or(usize::MAX);
        let start = usize::try_from(range.start).unwrap_or(usize::MAX);
        if end > data.len() || start > end {
            let err = io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {range} beyond end of {} byte file", data.len()),
            );
            return stream::once(async move { Err(err) }).boxed();
        }

        let bytes = Bytes::copy_from_slice(&data[start..end]);
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<io::Result<Bytes>> = (0..bytes.len())
            .step_by(chunk_size)
            .map(|offset| Ok(bytes.slice(offset..bytes.len().min(offset + chunk_size))))
            .collect();
        stream::iter(chunks).boxed()
    }

    async fn write_at(&self, offset: u64, data: Bytes) -> io::Result<()> {
        if self.mode != IoMode::Write {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "channel is open for reading",
            ));
        }
        let offset = usize::try_from(offset).map_err(io::Error::other)?;
        let mut content = self.lock();
        let end = offset + data.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(&data);
        Ok(())
    }
}
