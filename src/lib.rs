//! # seqwire
//!
//! Minimal RPC transport over any byte stream.
//!
//! A client multiplexes concurrent calls over one connection and correlates
//! responses by sequence number. A server dispatches every request to its own
//! task and serializes the responses back onto the connection.
//!
//! ## Architecture
//!
//! - **Handshake**: one JSON line selecting the codec, sent first
//! - **Codec**: `(Header, Body)` records, MessagePack (length-prefixed) or
//!   JSON (newline-delimited)
//! - **Server**: method registry, bounded concurrent handlers, one write gate
//!   per connection
//! - **Client**: pending-call table, one receive task per connection
//!
//! ## Example
//!
//! ```ignore
//! use seqwire::{Client, ClientConfig, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .handle("Echo.Do", |msg: String, ctx| async move {
//!             Ok(format!("{msg} #{}", ctx.seq()))
//!         })
//!         .build()?;
//!
//!     let listener = TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!     tokio::spawn(async move { server.accept(listener).await });
//!
//!     let client = Client::dial(addr, &ClientConfig::default()).await?;
//!     let reply: String = client.call("Echo.Do", "hello").await?;
//!     assert_eq!(reply, "hello #0");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod client;
mod server;

pub use client::{Call, Client, ClientConfig};
pub use codec::{CodecType, Header};
pub use error::{Result, RpcError};
pub use handler::RequestContext;
pub use protocol::{HandshakeOption, MAGIC_NUMBER};
pub use server::{Server, ServerBuilder, ServerConfig, DEFAULT_MAX_CONCURRENT_HANDLERS};
