//! Byte relay used by the tunnel peer.
//!
//! The peer runs inside the container under `kubectl exec`; its stdin and
//! stdout are the controller's tunnel, and `socket` is the agent's listener.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Copy `input → socket` and `socket → output` until the agent side closes.
///
/// When `input` reaches EOF first the socket's write half is shut down and
/// the relay keeps draining the agent's replies until the agent hangs up.
pub async fn relay<I, O, S>(mut input: I, mut output: O, socket: S) -> io::Result<()>
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite,
{
    let (mut sock_read, mut sock_write) = tokio::io::split(socket);

    let downstream = async {
        tokio::io::copy(&mut sock_read, &mut output).await?;
        output.flush().await
    };
    tokio::pin!(downstream);

    let upstream = async {
        tokio::io::copy(&mut input, &mut sock_write).await?;
        sock_write.shutdown().await
    };

    tokio::select! {
        result = &mut downstream => result,
        result = upstream => {
            if let Err(err) = result {
                tracing::debug!(error = %err, "relay input side failed");
            }
            downstream.await
        }
    }
}
