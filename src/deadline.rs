use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::{Instant, Sleep, sleep},
};

/// Stream wrapper that fails reads and writes left waiting for too long.
///
/// A deadline starts counting when an operation first returns `Pending`, and is
/// cleared as soon as that operation makes progress. An expired deadline yields
/// an error of kind [`io::ErrorKind::TimedOut`].
pub(crate) struct DeadlineStream<S> {
    inner: S,
    read_timeout: Duration,
    write_timeout: Duration,
    read_deadline: Pin<Box<Sleep>>,
    write_deadline: Pin<Box<Sleep>>,
    read_waiting: bool,
    write_waiting: bool,
}

impl<S> DeadlineStream<S> {
    pub(crate) fn new(inner: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        DeadlineStream {
            inner,
            read_timeout,
            write_timeout,
            read_deadline: Box::pin(sleep(read_timeout)),
            write_deadline: Box::pin(sleep(write_timeout)),
            read_waiting: false,
            write_waiting: false,
        }
    }
}

// Poll an operation against its deadline, arming the deadline on the first `Pending`.
fn poll_with_deadline<T>(
    cx: &mut Context<'_>,
    result: Poll<io::Result<T>>,
    deadline: &mut Pin<Box<Sleep>>,
    waiting: &mut bool,
    timeout: Duration,
    operation: &'static str,
) -> Poll<io::Result<T>> {
    match result {
        Poll::Ready(result) => {
            *waiting = false;
            Poll::Ready(result)
        }
        Poll::Pending => {
            if !*waiting {
                *waiting = true;
                deadline.as_mut().reset(Instant::now() + timeout);
            }
            match deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    *waiting = false;
                    Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{operation} deadline of {timeout:?} elapsed"),
                    )))
                }
                Poll::Pending => Poll::Pending,
            }
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        poll_with_deadline(
            cx,
            result,
            &mut this.read_deadline,
            &mut this.read_waiting,
            this.read_timeout,
            "read",
        )
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        poll_with_deadline(
            cx,
            result,
            &mut this.write_deadline,
            &mut this.write_waiting,
            this.write_timeout,
            "write",
        )
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_flush(cx);
        poll_with_deadline(
            cx,
            result,
            &mut this.write_deadline,
            &mut this.write_waiting,
            this.write_timeout,
            "write",
        )
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        poll_with_deadline(
            cx,
            result,
            &mut this.write_deadline,
            &mut this.write_waiting,
            this.write_timeout,
            "write",
        )
    }
}
