/// Duplex stream plumbing between the HTTP layer and the codec
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A single read/write stream that can be closed.
///
/// This is what a codec is built over. Closing is separate from
/// `AsyncWrite::poll_shutdown` so that owners of the underlying
/// streams can decide what "closed" means.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {
    fn close(&mut self) -> io::Result<()>;
}

/// Pairs an independent reader and writer into one [`DuplexStream`].
///
/// `close` does nothing: both halves belong to the HTTP request/response
/// cycle and are released by the HTTP layer when it ends.
#[derive(Debug)]
pub struct ReadWriteNopCloser<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> ReadWriteNopCloser<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R, W> AsyncRead for ReadWriteNopCloser<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for ReadWriteNopCloser<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    // The writer is not ours to shut down, flushing is as far as we go.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }
}

impl<R, W> DuplexStream for ReadWriteNopCloser<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
