use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

/// Wraps a stream so that every successful read or write resets an idle
/// deadline; a background watcher closes the stream once the deadline
/// elapses without activity, failing in-flight operations promptly.
pub struct IdleTimeoutIo<T> {
    inner: T,
    last_activity: Arc<Mutex<Instant>>,
    timed_out: Arc<AtomicBool>,
    _watchdog: tokio::task::JoinHandle<()>,
}

impl<T> IdleTimeoutIo<T> {
    pub fn new(inner: T, idle: Duration) -> Self {
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let timed_out = Arc::new(AtomicBool::new(false));

        let watchdog = {
            let last_activity = last_activity.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                let poll_interval = (idle / 4).max(Duration::from_millis(50));
                loop {
                    tokio::time::sleep(poll_interval).await;
                    let elapsed = last_activity.lock().expect("poisoned").elapsed();
                    if elapsed >= idle {
                        timed_out.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            })
        };

        Self {
            inner,
            last_activity,
            timed_out,
            _watchdog: watchdog,
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("poisoned") = Instant::now();
    }

    fn check_timed_out(&self) -> io::Result<()> {
        if self.timed_out.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))
        } else {
            Ok(())
        }
    }
}

impl<T> Drop for IdleTimeoutIo<T> {
    fn drop(&mut self) {
        self._watchdog.abort();
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for IdleTimeoutIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Err(e) = self.check_timed_out() {
            return Poll::Ready(Err(e));
        }
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &res {
            if buf.filled().len() > before {
                self.touch();
            }
        }
        res
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for IdleTimeoutIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Err(e) = self.check_timed_out() {
            return Poll::Ready(Err(e));
        }
        let res = Pin::new(&mut self.inner).poll_write(cx, data);
        if matches!(res, Poll::Ready(Ok(n)) if n > 0) {
            self.touch();
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn closes_after_idle_period() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut wrapped = IdleTimeoutIo::new(a, Duration::from_millis(200));

        wrapped.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        b.read_exact(&mut buf).await.unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;

        let err = wrapped.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
