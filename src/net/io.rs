//! Activity-reporting IO wrapper.
//!
//! Every successful, non-empty read or write on the wrapped stream counts as
//! activity on the connection. Once the connection is destroyed all further
//! IO fails with `ConnectionAborted`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::net::connection::ConnectionHandle;

/// Stream wrapper bound to a [`ConnectionHandle`].
#[derive(Debug)]
pub struct ObservedIo<T> {
    inner: T,
    connection: ConnectionHandle,
}

impl<T> ObservedIo<T> {
    pub fn new(inner: T, connection: ConnectionHandle) -> Self {
        Self { inner, connection }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn check_alive(&self) -> io::Result<()> {
        if self.connection.is_destroyed() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                format!("connection {} was destroyed", self.connection.id()),
            ));
        }
        Ok(())
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ObservedIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.check_alive()?;
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            if buf.filled().len() > before {
                self.connection.record_activity();
            }
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ObservedIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.check_alive()?;
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = poll {
            if written > 0 {
                self.connection.record_activity();
            }
        }
        poll
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.check_alive()?;
        let poll = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(written)) = poll {
            if written > 0 {
                self.connection.record_activity();
            }
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
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
    use super::*;
    use crate::http::request::{RequestId, Signal};
    use crate::net::target::Target;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn reads_and_writes_are_activity() {
        let connection = ConnectionHandle::new(Target::new("localhost", 80));
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.instrumentation().mark_instrumented(RequestId::new(), tx);

        let (client, mut server) = tokio::io::duplex(64);
        let mut io = ObservedIo::new(client, connection.clone());

        io.write_all(b"ping").await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(Signal::Activity)));

        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
        assert!(matches!(rx.try_recv(), Ok(Signal::Activity)));
    }

    #[tokio::test]
    async fn destroyed_connection_refuses_io() {
        let connection = ConnectionHandle::new(Target::new("localhost", 80));
        let (client, _server) = tokio::io::duplex(64);
        let mut io = ObservedIo::new(client, connection.clone());

        connection.destroy();
        let err = io.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
