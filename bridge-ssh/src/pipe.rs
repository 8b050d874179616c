use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// One end of an in-memory [`DualPipe`]. Reports the address pair crossed
/// relative to the other end: the server-side end reports `src` as its
/// local address and `dst` as its remote address, the client-side end
/// reports the opposite, so each side can be consumed as if it were a
/// real accepted/dialed TCP socket.
#[derive(Debug)]
pub struct PipeEnd {
    inner: DuplexStream,
    local_addr: String,
    remote_addr: String,
}

impl PipeEnd {
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }
}

impl AsyncRead for PipeEnd {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeEnd {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// A paired `(srv_side, cli_side)` bidirectional byte stream. Writes on
/// one are readable on the other, in order; dropping either end causes
/// pending reads/writes on both to fail promptly, since `DuplexStream`
/// treats a dropped peer as EOF/broken-pipe.
pub struct DualPipe;

impl DualPipe {
    /// `max_buf_size` bounds how much data either side may have in
    /// flight before a writer blocks; large enough not to matter for SSH
    /// framing, small enough to apply backpressure under a stalled peer.
    pub fn new(src_addr: impl Into<String>, dst_addr: impl Into<String>) -> (PipeEnd, PipeEnd) {
        const MAX_BUF_SIZE: usize = 64 * 1024;
        let src_addr = src_addr.into();
        let dst_addr = dst_addr.into();
        let (srv_duplex, cli_duplex) = tokio::io::duplex(MAX_BUF_SIZE);
        let srv_side = PipeEnd {
            inner: srv_duplex,
            local_addr: src_addr.clone(),
            remote_addr: dst_addr.clone(),
        };
        let cli_side = PipeEnd {
            inner: cli_duplex,
            local_addr: dst_addr,
            remote_addr: src_addr,
        };
        (srv_side, cli_side)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn crosses_local_and_remote_addresses() {
        let (srv, cli) = DualPipe::new("10.0.0.1:22", "10.0.0.2:50000");
        assert_eq!(srv.local_addr(), "10.0.0.1:22");
        assert_eq!(srv.remote_addr(), "10.0.0.2:50000");
        assert_eq!(cli.local_addr(), "10.0.0.2:50000");
        assert_eq!(cli.remote_addr(), "10.0.0.1:22");
    }

    #[tokio::test]
    async fn bidirectional_byte_copy() {
        let (mut srv, mut cli) = DualPipe::new("a", "b");
        srv.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        cli.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        cli.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        srv.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn closing_one_end_fails_the_other() {
        let (srv, mut cli) = DualPipe::new("a", "b");
        drop(srv);
        let mut buf = [0u8; 4];
        let n = cli.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "dropped peer should read as EOF");
    }
}
