use std::{io, mem};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::channel::{ByteStream, Channel};
use crate::framing::BodyPart;

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the
    /// `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new
    /// stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// Reads `length` bytes starting at `start` from a seekable reader. Implements [`Stream`].
///
/// The reader is owned by the stream, so every stream has its own position.
#[pin_project]
pub struct RangedStream<B> {
    state: StreamState,
    length: u64,
    chunk_size: usize,
    #[pin]
    body: B,
}

impl<B: AsyncRead + AsyncSeekStart> RangedStream<B> {
    pub fn new(body: B, start: u64, length: u64, chunk_size: usize) -> Self {
        RangedStream {
            state: StreamState::Seek { start },
            length,
            chunk_size: chunk_size.max(1),
            body,
        }
    }
}

#[derive(Debug)]
enum StreamState {
    Seek { start: u64 },
    Seeking { remaining: u64 },
    Reading { buffer: BytesMut, remaining: u64 },
    Done,
}

impl<B: AsyncRead + AsyncSeekStart> Stream for RangedStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        if let StreamState::Seek { start } = *this.state {
            match this.body.as_mut().start_seek(start) {
                Err(e) => {
                    *this.state = StreamState::Done;
                    return Poll::Ready(Some(Err(e)));
                }
                Ok(()) => {
                    let remaining = *this.length;
                    *this.state = StreamState::Seeking { remaining };
                }
            }
        }

        if let StreamState::Seeking { remaining } = *this.state {
            match this.body.as_mut().poll_complete(cx) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Err(e)) => {
                    *this.state = StreamState::Done;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Ok(())) => {
                    let buffer = BytesMut::with_capacity(*this.chunk_size);
                    *this.state = StreamState::Reading { buffer, remaining };
                }
            }
        }

        if let StreamState::Reading { buffer, remaining } = this.state {
            if *remaining == 0 {
                *this.state = StreamState::Done;
                return Poll::Ready(None);
            }

            let uninit = buffer.spare_capacity_mut();

            // the smaller of the buffer size and the number of bytes remaining
            let nbytes = std::cmp::min(
                uninit.len(),
                usize::try_from(*remaining).unwrap_or(usize::MAX),
            );

            let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

            match this.body.as_mut().poll_read(cx, &mut read_buf) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Err(e)) => {
                    *this.state = StreamState::Done;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Ok(())) => {
                    match read_buf.filled().len() {
                        0 => {
                            let missing = *remaining;
                            *this.state = StreamState::Done;
                            return Poll::Ready(Some(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!("file ended {missing} bytes before the end of the range"),
                            ))));
                        }
                        n => {
                            // SAFETY: poll_read has filled the buffer with `n`
                            // additional bytes. `buffer.len` should always be
                            // 0 here, but include it for rigorous correctness
                            unsafe { buffer.set_len(buffer.len() + n); }

                            let fresh = BytesMut::with_capacity(*this.chunk_size);
                            let chunk = mem::replace(buffer, fresh);

                            // n cannot exceed remaining due to the cmp::min above
                            *remaining -= n as u64;

                            return Poll::Ready(Some(Ok(chunk.freeze())));
                        }
                    }
                }
            }
        }

        Poll::Ready(None)
    }
}

/// Response body producing the framed parts in order. Implements [`Body`].
///
/// The body reports the framed length as its exact size and fails with
/// [`io::ErrorKind::UnexpectedEof`] if the channel delivers fewer bytes, or
/// [`io::ErrorKind::InvalidData`] if it delivers more.
#[pin_project]
pub struct FramedBody {
    #[pin]
    parts: ByteStream,
    remaining: u64,
}

impl FramedBody {
    pub fn new(parts: Vec<BodyPart>, channel: Arc<dyn Channel>, chunk_size: usize) -> Self {
        let remaining = parts.iter().map(BodyPart::len).sum();
        let stream = try_stream! {
            for part in parts {
                match part {
                    BodyPart::Literal(bytes) => yield bytes,
                    BodyPart::Read(range) => {
                        let mut reads = channel.read_range(range, chunk_size);
                        while let Some(chunk) = reads.next().await {
                            let chunk: Bytes = chunk?;
                            yield chunk;
                        }
                    }
                }
            }
        };
        FramedBody { parts: stream.boxed(), remaining }
    }
}

impl std::fmt::Debug for FramedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedBody")
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl Body for FramedBody {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        let mut this = self.project();
        let error = match this.parts.as_mut().poll_next(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) if chunk.len() as u64 <= *this.remaining => {
                *this.remaining -= chunk.len() as u64;
                return Poll::Ready(Some(Ok(Frame::data(chunk))));
            }
            Poll::Ready(None) if *this.remaining == 0 => return Poll::Ready(None),
            Poll::Ready(Some(Err(e))) => e,
            Poll::Ready(Some(Ok(_))) => io::Error::new(
                io::ErrorKind::InvalidData,
                "channel delivered more bytes than requested",
            ),
            Poll::Ready(None) => io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body ended {} bytes early", *this.remaining),
            ),
        };

        // the body is over after the first error
        tracing::warn!(error = %error, remaining = *this.remaining, "response body aborted");
        *this.remaining = 0;
        this.parts.set(stream::empty().boxed());
        Poll::Ready(Some(Err(error)))
    }
}
