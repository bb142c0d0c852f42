use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::channel::{ByteStream, Channel, Checksum, IoMode};
use crate::range::ByteRange;
use crate::stream::RangedStream;

/// Implements [`Channel`] for a pool-resident file on the local filesystem.
///
/// Every read opens its own handle, so concurrent range reads never share a
/// cursor. Writes go through a single handle, serialised by a lock.
pub struct FileChannel {
    path: String,
    local_path: PathBuf,
    mode: IoMode,
    /// File size when opened for reading, highest written offset otherwise.
    byte_size: AtomicU64,
    checksums: Vec<Checksum>,
    writer: Option<Mutex<File>>,
}

impl std::fmt::Debug for FileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChannel")
            .field("path", &self.path)
            .field("local_path", &self.local_path)
            .field("mode", &self.mode)
            .field("byte_size", &self.byte_size.load(Ordering::Relaxed))
            .finish()
    }
}

impl FileChannel {
    /// Calls [`tokio::fs::metadata`] to determine the size of the file to be read.
    pub async fn reader(
        path: impl Into<String>,
        local_path: impl AsRef<Path>,
    ) -> io::Result<FileChannel> {
        let local_path = local_path.as_ref().to_path_buf();
        let byte_size = tokio::fs::metadata(&local_path).await?.len();
        Ok(FileChannel {
            path: path.into(),
            local_path,
            mode: IoMode::Read,
            byte_size: AtomicU64::new(byte_size),
            checksums: Vec::new(),
            writer: None,
        })
    }

    /// Creates (or truncates) the file that uploads will be written to.
    pub async fn writer(
        path: impl Into<String>,
        local_path: impl AsRef<Path>,
    ) -> io::Result<FileChannel> {
        let local_path = local_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&local_path)
            .await?;
        Ok(FileChannel {
            path: path.into(),
            local_path,
            mode: IoMode::Write,
            byte_size: AtomicU64::new(0),
            checksums: Vec::new(),
            writer: Some(Mutex::new(file)),
        })
    }

    pub fn with_checksums(mut self, checksums: Vec<Checksum>) -> Self {
        self.checksums = checksums;
        self
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

#[async_trait]
impl Channel for FileChannel {
    fn size(&self) -> io::Result<u64> {
        Ok(self.byte_size.load(Ordering::Acquire))
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
        let local_path = self.local_path.clone();
        let stream = try_stream! {
            let file = File::open(&local_path).await?;
            let mut reads = RangedStream::new(file, range.start, range.len(), chunk_size);
            while let Some(chunk) = reads.next().await {
                let chunk: Bytes = chunk?;
                yield chunk;
            }
        };
        stream.boxed()
    }

    async fn write_at(&self, offset: u64, data: Bytes) -> io::Result<()> {
        let Some(writer) = &self.writer else {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is open for reading", self.path),
            ));
        };
        let mut file = writer.lock().await;
        file.seek(io::SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        self.byte_size.fetch_max(offset + data.len() as u64, Ordering::AcqRel);
        Ok(())
    }
}
