//! A connection made of two one-way pipes.
//!
//! [`TunnelConnection`] lets the RPC client talk to a subprocess (usually a
//! `kubectl exec` running the tunnel peer) as if it were a socket peer: reads
//! come from the subprocess's stdout, writes go to its stdin. It is a thin
//! adapter; no buffering, framing or retry happens here.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::Instant;

/// Address reported by both ends of a tunnel. There is no socket behind a
/// tunnel, so callers must not use it for identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelAddr {
    Unnamed,
}

impl fmt::Display for TunnelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unnamed")
    }
}

/// Tunnel over type-erased pipes, as produced by process spawners.
pub type BoxedTunnel = TunnelConnection<
    Box<dyn AsyncRead + Send + Unpin>,
    Box<dyn AsyncWrite + Send + Unpin>,
>;

/// Read pipe + write pipe presented as one bidirectional stream.
pub struct TunnelConnection<R, W> {
    reader: Option<R>,
    writer: Option<W>,
}

impl<R, W> TunnelConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    pub fn local_addr(&self) -> TunnelAddr {
        TunnelAddr::Unnamed
    }

    pub fn remote_addr(&self) -> TunnelAddr {
        TunnelAddr::Unnamed
    }

    /// Accepted and ignored. Pipes carry no deadline; cancellation is done
    /// with a `CancellationToken` at the RPC layer instead.
    pub fn set_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Accepted and ignored, see [`Self::set_deadline`].
    pub fn set_read_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// Accepted and ignored, see [`Self::set_deadline`].
    pub fn set_write_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }

    /// Close both pipes. Only the first call does any work; later calls
    /// return `Ok(())`. After closing, reads report EOF and writes fail with
    /// `BrokenPipe`.
    pub async fn close(&mut self) -> io::Result<()> {
        drop(self.reader.take());
        match self.writer.take() {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }
}

impl<R, W> TunnelConnection<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Erase the pipe types.
    pub fn boxed(self) -> BoxedTunnel {
        TunnelConnection {
            reader: self
                .reader
                .map(|r| Box::new(r) as Box<dyn AsyncRead + Send + Unpin>),
            writer: self
                .writer
                .map(|w| Box::new(w) as Box<dyn AsyncWrite + Send + Unpin>),
        }
    }
}

impl<R: AsyncRead + Unpin, W: Unpin> AsyncRead for TunnelConnection<R, W> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().reader.as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl<R: Unpin, W: AsyncWrite + Unpin> AsyncWrite for TunnelConnection<R, W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_write(cx, buf),
            None => Poll::Ready(Err(closed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().writer.as_mut() {
            Some(writer) => Pin::new(writer).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "tunnel connection closed")
}
