//! Shared mock backends for integration tests.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use phase_timeout::http::Connect;
use phase_timeout::net::Target;

/// Read one request head. Returns `false` on a clean EOF.
async fn read_request_head(socket: &mut TcpStream) -> io::Result<bool> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if socket.read(&mut byte).await? == 0 {
            return Ok(false);
        }
        head.push(byte[0]);
    }
    Ok(true)
}

fn ok_response(body: &str, close: bool) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n{}",
        body.len(),
        if close { "Connection: close\r\n" } else { "" },
        body
    )
}

/// Accepts connections and never writes a byte.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Answers every request on a connection after `delay`, keeping it open.
/// Returns the address and a counter of accepted connections.
pub async fn start_keep_alive_backend(
    body: &'static str,
    delay: Duration,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                while let Ok(true) = read_request_head(&mut socket).await {
                    tokio::time::sleep(delay).await;
                    if socket.write_all(ok_response(body, false).as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    (addr, accepted)
}

/// Sends the response head, then a body of `chunks` bytes, one every `interval`.
pub async fn start_drip_backend(chunks: usize, interval: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if !matches!(read_request_head(&mut socket).await, Ok(true)) {
                    return;
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    chunks
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for _ in 0..chunks {
                    tokio::time::sleep(interval).await;
                    if socket.write_all(b"x").await.is_err() {
                        return;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Connector whose handshake never completes, like an unroutable address.
#[derive(Debug, Clone, Default)]
pub struct BlackholeConnector;

impl Connect for BlackholeConnector {
    type Io = TcpStream;

    fn connect(&self, _target: &Target) -> impl Future<Output = io::Result<TcpStream>> + Send {
        std::future::pending()
    }
}
