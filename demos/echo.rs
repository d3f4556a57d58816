//! Echo demo - server and client over TCP loopback.
//!
//! This demo shows:
//! - Building a server with typed method handlers
//! - Dialing with a chosen codec
//! - Synchronous `call` and asynchronous `go` with a shared channel
//!
//! # Running
//!
//! ```text
//! RUST_LOG=seqwire=debug cargo run --example echo -- json
//! ```

use seqwire::{Call, Client, ClientConfig, CodecType, RequestContext, Server};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Arguments for `Arith.Mul`.
#[derive(Serialize, Deserialize, Debug)]
struct MulArgs {
    a: i64,
    b: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let codec: CodecType = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("msgpack")
        .parse()?;

    let server = Server::builder()
        .handle("Echo.Do", |msg: String, ctx: RequestContext| async move {
            Ok(format!("{msg} (seq {})", ctx.seq()))
        })
        .handle("Arith.Mul", |args: MulArgs, _ctx| async move {
            args.a
                .checked_mul(args.b)
                .ok_or_else(|| "overflow".to_string())
        })
        .build()?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { server.accept(listener).await });

    let client = Client::dial(addr, &ClientConfig::with_codec(codec)).await?;

    let reply: String = client.call("Echo.Do", "hello").await?;
    println!("Echo.Do -> {reply}");

    let (done, mut completed) = mpsc::channel::<Call<i64>>(5);
    for i in 1..=5 {
        client
            .go("Arith.Mul", &MulArgs { a: i, b: i * 10 }, done.clone())
            .await;
    }
    drop(done);

    while let Some(call) = completed.recv().await {
        match call.into_result() {
            Ok(product) => println!("Arith.Mul -> {product}"),
            Err(e) => println!("Arith.Mul failed: {e}"),
        }
    }

    let overflow: Result<i64, _> = client
        .call("Arith.Mul", &MulArgs { a: i64::MAX, b: 2 })
        .await;
    println!("Arith.Mul overflow -> {overflow:?}");

    client.close().await?;
    Ok(())
}
