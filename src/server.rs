//! Server builder and per-connection dispatch loop.
//!
//! The [`ServerBuilder`] registers methods and sets limits. The [`Server`]
//! runs each connection through the same lifecycle:
//! 1. Read and validate the handshake option
//! 2. Build the negotiated codec
//! 3. Read requests and spawn one handler task per request
//! 4. On a fatal read error, wait for in-flight handlers, then close
//!
//! Responses from concurrent handlers go through a single write gate, so a
//! header and its body are never interleaved with another response.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::Server;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .handle("Echo.Do", |msg: String, _ctx| async move { Ok(msg) })
//!         .build()?;
//!
//!     let listener = TcpListener::bind("127.0.0.1:9999").await?;
//!     server.accept(listener).await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::codec::{Codec, CodecReader, CodecType, CodecWriter, EmptyBody, Header};
use crate::error::{Result, RpcError};
use crate::handler::{BoxFuture, MethodRegistry, MethodResult, ReplyResult, RequestContext};
use crate::protocol::{read_option, DEFAULT_MAX_RECORD_SIZE};

/// Default maximum concurrent handlers per connection.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Codecs a client may select in its handshake.
    pub codecs: Vec<CodecType>,
    /// Maximum handlers running at once on one connection.
    ///
    /// When reached, the read loop waits for a handler to finish.
    pub max_concurrent_handlers: usize,
    /// Maximum size of one header or body record.
    pub max_record_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            codecs: CodecType::ALL.to_vec(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }
}

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder {
    registry: MethodRegistry,
    config: ServerConfig,
    /// First registration error, reported by `build()`.
    error: Option<RpcError>,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            registry: MethodRegistry::new(),
            config: ServerConfig::default(),
            error: None,
        }
    }

    /// Register a method.
    ///
    /// The handler receives the decoded argument and a context, and resolves
    /// to the reply or to error text sent back in the response header.
    /// A malformed or duplicate name makes `build()` fail.
    pub fn handle<F, T, R, Fut>(mut self, service_method: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = MethodResult<R>> + Send + 'static,
    {
        if let Err(e) = self.registry.register(service_method, handler) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Set the maximum number of concurrent handlers per connection.
    ///
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Restrict the codecs clients may select.
    ///
    /// Default: all built-in codecs
    pub fn codecs(mut self, codecs: impl IntoIterator<Item = CodecType>) -> Self {
        self.config.codecs = codecs.into_iter().collect();
        self
    }

    /// Set the maximum record size.
    ///
    /// Default: 64 MiB
    pub fn max_record_size(mut self, max: usize) -> Self {
        self.config.max_record_size = max;
        self
    }

    /// Build the server.
    ///
    /// # Errors
    ///
    /// Returns the first registration error, or a protocol error if the
    /// configuration is unusable.
    pub fn build(self) -> Result<Server> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.config.codecs.is_empty() {
            return Err(RpcError::Protocol("server has no codecs enabled".to_string()));
        }
        if self.config.max_concurrent_handlers == 0 {
            return Err(RpcError::Protocol(
                "max_concurrent_handlers must be at least 1".to_string(),
            ));
        }

        Ok(Server {
            inner: Arc::new(ServerInner {
                registry: self.registry,
                config: self.config,
            }),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ServerInner {
    registry: MethodRegistry,
    config: ServerConfig,
}

/// An RPC server. Cloning is cheap; clones share the registry.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

/// Outcome of reading one request.
enum Inbound {
    /// Method resolved and argument decoded; the future runs the method.
    Dispatch {
        header: Header,
        reply: BoxFuture<'static, ReplyResult>,
    },
    /// Request answered with an error response, no handler runs.
    Reject { header: Header, error: String },
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        self.inner.registry.method_names()
    }

    /// Accept TCP connections and serve each on its own task.
    ///
    /// Returns when accepting fails.
    pub async fn accept(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("rpc server: accepted connection from {}", addr);
                    let server = self.clone();
                    tokio::spawn(async move { server.serve_conn(stream).await });
                }
                Err(e) => {
                    error!("rpc server: accept error: {}", e);
                    return;
                }
            }
        }
    }

    /// Accept Unix socket connections and serve each on its own task.
    ///
    /// Returns when accepting fails.
    #[cfg(unix)]
    pub async fn accept_unix(&self, listener: crate::transport::UnixSocketListener) {
        loop {
            match listener.accept().await {
                Ok(stream) => {
                    debug!("rpc server: accepted connection on {}", listener.path());
                    let server = self.clone();
                    tokio::spawn(async move { server.serve_conn(stream).await });
                }
                Err(e) => {
                    error!("rpc server: accept error: {}", e);
                    return;
                }
            }
        }
    }

    /// Serve one connection until the peer goes away.
    ///
    /// A connection whose handshake is unreadable, carries the wrong magic
    /// number or names a codec that is not enabled is closed without a reply.
    pub async fn serve_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let option = match read_option(&mut reader).await {
            Ok(option) => option,
            Err(e) => {
                warn!("rpc server: options error: {}", e);
                return;
            }
        };

        let codec_type = match option.validate(&self.inner.config.codecs) {
            Ok(codec_type) => codec_type,
            Err(e) => {
                warn!("rpc server: rejecting connection: {}", e);
                return;
            }
        };

        debug!("rpc server: negotiated codec {}", codec_type);
        let codec = Codec::from_buffered(codec_type, reader, write_half)
            .with_max_record_size(self.inner.config.max_record_size);
        self.serve_codec(codec).await;
    }

    /// Serve requests over an already negotiated codec.
    ///
    /// Reads until the stream fails, then waits for every handler it
    /// started to write its response before closing the write side.
    pub async fn serve_codec<R, W>(&self, codec: Codec<R, W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, writer) = codec.into_split();
        let sending = Arc::new(Mutex::new(writer));
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_concurrent_handlers));
        let mut handlers = JoinSet::new();

        loop {
            let inbound = match self.read_request(&mut reader).await {
                Ok(inbound) => inbound,
                Err(RpcError::ConnectionClosed) => {
                    debug!("rpc server: connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!("rpc server: read request error: {}", e);
                    break;
                }
            };

            match inbound {
                Inbound::Reject { header, error } => {
                    send_error(&sending, header, error).await;
                }
                Inbound::Dispatch { header, reply } => {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    handlers.spawn(handle_request(sending.clone(), header, reply, permit));
                }
            }

            while handlers.try_join_next().is_some() {}
        }

        while handlers.join_next().await.is_some() {}

        let closed = sending.lock().await.close().await;
        if let Err(e) = closed {
            debug!("rpc server: close error: {}", e);
        }
    }

    /// Read one header and body, then resolve the method and decode the
    /// argument.
    ///
    /// Only stream failures are returned as errors; a bad request becomes
    /// [`Inbound::Reject`].
    async fn read_request<R>(&self, reader: &mut CodecReader<R>) -> Result<Inbound>
    where
        R: AsyncRead + Unpin,
    {
        let header = reader.read_header().await?;
        let body = reader.read_body_raw().await?;
        let codec_type = reader.codec_type();

        let Some(handler) = self.inner.registry.get(&header.service_method) else {
            let error = format!("rpc server: can't find method {}", header.service_method);
            return Ok(Inbound::Reject { header, error });
        };

        let ctx = RequestContext::new(&header.service_method, header.seq, codec_type);
        match handler.call(codec_type, &body, ctx) {
            Ok(reply) => Ok(Inbound::Dispatch { header, reply }),
            Err(e) => Ok(Inbound::Reject {
                header,
                error: format!("rpc server: read argument error: {e}"),
            }),
        }
    }
}

/// Run one method and write its response. The permit is held until the
/// response is written.
async fn handle_request<W>(
    sending: Arc<Mutex<CodecWriter<W>>>,
    header: Header,
    reply: BoxFuture<'static, ReplyResult>,
    _permit: OwnedSemaphorePermit,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let result = match tokio::spawn(reply).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err("rpc server: method panicked".to_string()),
        Err(_) => Err("rpc server: method cancelled".to_string()),
    };

    let body = match result {
        Ok(body) => body,
        Err(error) => return send_error(&sending, header, error).await,
    };

    let mut writer = sending.lock().await;
    match writer.write_raw(&header, &body).await {
        Ok(()) => {}
        Err(e @ (RpcError::RecordTooLarge { .. } | RpcError::Protocol(_))) => {
            // Nothing reached the stream; answer with the framing error instead.
            let error_header = Header {
                error: format!("rpc server: write response error: {e}"),
                ..header
            };
            if let Err(e) = writer.write(&error_header, &EmptyBody {}).await {
                error!("rpc server: write response error: {}", e);
            }
        }
        Err(e) => error!("rpc server: write response error: {}", e),
    }
}

/// Write an error response with an empty body.
async fn send_error<W>(sending: &Mutex<CodecWriter<W>>, mut header: Header, error: String)
where
    W: AsyncWrite + Unpin,
{
    debug!(
        "rpc server: {} seq={} failed: {}",
        header.service_method, header.seq, error
    );
    header.error = error;

    let mut writer = sending.lock().await;
    if let Err(e) = writer.write(&header, &EmptyBody {}).await {
        error!("rpc server: write response error: {}", e);
    }
}
