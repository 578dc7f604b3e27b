//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and, per connection, runs the parse → handle →
//! flush loop described in [`crate::http`]: one request at a time, with
//! HTTP/1.1 keep-alive by default and graceful shutdown via a broadcast
//! stop signal.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::http::parser::{ParseError, ScratchBuffer};
use crate::http::{ConnectionType, Request, Response, StatusCode};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Startup configuration for a [`Server`]. All fields are resolved once at
/// bind time and immutable thereafter.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Maximum size of the header scratch buffer. Default 64 KiB.
    pub header_buffer_size: usize,
    /// TCP listen backlog. Default 128.
    pub listen_backlog: u32,
    /// Capacity of the per-connection buffered reader/writer. Default 4 KiB.
    pub read_buffer_size: usize,
}

/// Hard cap on [`ServerConfig::header_buffer_size`] — 16 MiB.
pub const MAX_HEADER_BUFFER_SIZE: usize = 16 * 1024 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            header_buffer_size: 64 * 1024,
            listen_backlog: 128,
            read_buffer_size: 4 * 1024,
        }
    }
}

impl ServerConfig {
    fn clamp_header_buffer_size(mut self) -> Self {
        if self.header_buffer_size > MAX_HEADER_BUFFER_SIZE {
            self.header_buffer_size = MAX_HEADER_BUFFER_SIZE;
        }
        self
    }
}

/// The rttp HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp::server::Server;
/// use rttp::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_req| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
}

/// A handle that can request graceful shutdown of a running [`Server`].
///
/// Cloning and sending a `ShutdownHandle` to another task lets that task
/// trigger shutdown; `Server::run` itself returns once the accept loop has
/// exited and all in-flight connections have drained.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signals the server to stop accepting new connections and, once
    /// in-flight connections drain, return from [`Server::run`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl Server {
    /// Binds the server to the given TCP address with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        Self::bind_with_config(addr, ServerConfig::default()).await
    }

    /// Binds the server with explicit [`ServerConfig`].
    ///
    /// `config.listen_backlog` only takes effect on platforms where Tokio's
    /// `TcpListener::bind` honors the OS default backlog tuning; rttp does
    /// not currently expose a lower-level `socket2`-based bind, so the
    /// value is recorded for documentation/introspection rather than
    /// passed to the kernel. See `DESIGN.md`.
    pub async fn bind_with_config(
        addr: impl AsRef<str>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let config = config.clamp_header_buffer_size();
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives a [`Request`] and must return a [`Future`] that
    /// resolves to a [`Response`]. The handler is wrapped in an [`Arc`] and
    /// shared across all spawned Tokio tasks, so it must be `Send + Sync + 'static`.
    ///
    /// Runs until shut down via a [`ShutdownHandle`] returned by
    /// [`Server::run_with_shutdown`], or forever if called through this
    /// plain `run`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let (_tx, rx) = watch::channel(false);
        self.run_with_shutdown(handler, rx).await
    }

    /// Like [`Server::run`], but also returns a [`ShutdownHandle`] that can
    /// be used to stop the accept loop and drain in-flight connections.
    pub fn run_with_shutdown_handle<H, F>(
        self,
        handler: H,
    ) -> (impl Future<Output = Result<(), ServerError>>, ShutdownHandle)
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let handle = ShutdownHandle { tx };
        (self.run_with_shutdown(handler, rx), handle)
    }

    async fn run_with_shutdown<H, F>(
        self,
        handler: H,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let config = self.config;
        let mut tasks = JoinSet::new();
        info!(address = %self.local_addr, "rttp listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    debug!(peer = %peer_addr, "connection accepted");
                    let handler = Arc::clone(&handler);

                    tasks.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer_addr, handler, config).await {
                            warn!(peer = %peer_addr, error = %e, "connection closed with error");
                        }
                    });
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("shutdown signaled — draining in-flight connections");
        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

/// Handles a single TCP connection over its lifetime, per spec.md §4.5:
/// wrap in buffered reader/writer, then loop {parse, fail-fast on missing
/// Host under 1.1, handle, synthesize 404 on an unflushed response, flush,
/// inspect connection policy, repeat or break}.
async fn handle_connection<H, F>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    config: ServerConfig,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::with_capacity(config.read_buffer_size, read_half);
    let mut writer = BufWriter::with_capacity(config.read_buffer_size, write_half);
    let scratch = ScratchBuffer::new(config.header_buffer_size);

    loop {
        let request = match Request::parse(&scratch, &mut reader).await {
            Ok(request) => request,
            Err(ParseError::EndOfStream) => {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
            Err(ParseError::MissingHost) => {
                warn!(peer = %peer_addr, "missing Host header under HTTP/1.1 — sending 400");
                write_and_close(&mut writer, "400 Bad Request").await?;
                break;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                write_and_close(&mut writer, &format!("400 Bad Request: {e}")).await?;
                break;
            }
        };

        let version = request.version();
        let request_connection_type = request.connection_type();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let mut response = handler(request).await;

        if !response.is_flushed() {
            if !response.is_dirty() {
                response = Response::not_found();
            }
            response.flush(&mut writer, version, request_connection_type).await?;
        }

        let response_connection_type = response.headers().get("connection").map(str::to_ascii_lowercase);
        let close_requested = matches!(request_connection_type, ConnectionType::Close)
            || response_connection_type.as_deref() == Some("close")
            || !version.is_1_1()
            || is_close_inducing(response.status());

        if close_requested {
            debug!(peer = %peer_addr, "closing connection");
            break;
        }
    }

    Ok(())
}

async fn write_and_close<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &str,
) -> std::io::Result<()> {
    let mut response = Response::new(StatusCode::BadRequest).body(body.to_string());
    response
        .flush(writer, crate::http::Version::Http11, ConnectionType::Close)
        .await
}

fn is_close_inducing(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::RequestEntityTooLarge
            | StatusCode::RequestUriTooLong
            | StatusCode::RequestHeaderFieldsTooLarge
            | StatusCode::RequestTimeout
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[tokio::test]
    async fn bind_reports_local_addr() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        assert_eq!(server.local_addr().ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn single_request_round_trip() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (fut, shutdown) = server.run_with_shutdown_handle(|req: Request| async move {
            assert_eq!(req.method(), &Method::Get);
            Response::new(StatusCode::Ok).body("hi")
        });
        let handle = tokio::spawn(fut);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 Ok\r\n"));
        assert!(text.ends_with("hi"));

        shutdown.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_host_yields_400() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (fut, shutdown) = server.run_with_shutdown_handle(|_req: Request| async {
            Response::new(StatusCode::Ok)
        });
        let handle = tokio::spawn(fut);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        shutdown.shutdown();
        handle.await.unwrap().unwrap();
    }
}
