//! Client call engine.
//!
//! A [`Client`] multiplexes many concurrent calls over one connection:
//! 1. Send the handshake option
//! 2. Spawn the receive task, the single reader of the connection
//! 3. For each call: encode the argument, take the send gate, register the
//!    call under the next sequence number, write the request
//! 4. The receive task removes the call matching each response and
//!    delivers it; on a read failure it terminates every pending call
//!
//! Registration and lookup use a short synchronous lock that is never held
//! across I/O. Writes go through a separate async lock so a slow write does
//! not block the receive task.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::dial("127.0.0.1:9999", &ClientConfig::default()).await?;
//!
//!     let reply: String = client.call("Echo.Do", "hello").await?;
//!     println!("{reply}");
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tracing::{debug, warn};

use crate::codec::{BoxedWriter, Codec, CodecReader, CodecType, CodecWriter, Header};
use crate::error::{Result, RpcError};
use crate::protocol::{write_option, HandshakeOption, DEFAULT_MAX_RECORD_SIZE};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Handshake option. The magic number is always forced to the protocol
    /// constant and an empty codec type selects the default codec.
    pub option: HandshakeOption,
    /// Maximum size of one header or body record.
    pub max_record_size: usize,
}

impl ClientConfig {
    /// Configuration selecting the given codec.
    pub fn with_codec(codec: CodecType) -> Self {
        Self {
            option: HandshakeOption::new(codec),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            option: HandshakeOption::default(),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }
}

/// A completed call, delivered on the channel passed to [`Client::go`].
#[derive(Debug)]
pub struct Call<R> {
    /// Method that was called.
    pub service_method: String,
    /// Sequence number assigned to the call, 0 if it was never sent.
    pub seq: u64,
    /// Decoded reply. `None` whenever `error` is set.
    pub reply: Option<R>,
    /// Why the call failed, if it did.
    pub error: Option<RpcError>,
}

impl<R> Call<R> {
    fn failed(service_method: &str, seq: u64, error: RpcError) -> Self {
        Self {
            service_method: service_method.to_string(),
            seq,
            reply: None,
            error: Some(error),
        }
    }

    /// Convert into the reply or the error.
    pub fn into_result(self) -> Result<R> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.reply
            .ok_or_else(|| RpcError::Protocol("call completed without a reply".to_string()))
    }
}

/// Delivers the outcome of one pending call, given its sequence number: the
/// raw reply body, or the error that ended it.
type Completion = Box<dyn FnOnce(u64, Result<Bytes>) + Send>;

struct PendingCall {
    service_method: String,
    complete: Completion,
}

struct ClientState {
    /// Next sequence number.
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// Set by `close()`.
    closing: bool,
    /// Set when the receive task stops.
    shutdown: bool,
}

struct ClientInner {
    codec_type: CodecType,
    /// Send gate: one request on the wire at a time.
    sending: AsyncMutex<CodecWriter<BoxedWriter>>,
    state: Mutex<ClientState>,
    /// Wakes the receive task on `close()`.
    closed: Notify,
}

impl ClientInner {
    /// Assign a sequence number and insert the call into the pending table.
    fn register_call(&self, call: PendingCall) -> std::result::Result<u64, PendingCall> {
        let mut state = self.state.lock();
        if state.closing || state.shutdown {
            return Err(call);
        }
        let seq = state.seq;
        state.seq += 1;
        state.pending.insert(seq, call);
        Ok(seq)
    }

    fn remove_call(&self, seq: u64) -> Option<PendingCall> {
        self.state.lock().pending.remove(&seq)
    }

    /// Mark the client shut down and fail every pending call.
    fn terminate_calls(&self, err: &RpcError) {
        let pending = {
            let mut state = self.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.pending)
        };

        for (seq, call) in pending {
            debug!(
                "rpc client: terminating {} seq={}: {}",
                call.service_method, seq, err
            );
            let error = match err {
                RpcError::Shutdown => RpcError::Shutdown,
                other => RpcError::Disconnected(other.to_string()),
            };
            (call.complete)(seq, Err(error));
        }
    }
}

/// An RPC client over one connection. Cloning is cheap; clones share the
/// connection.
///
/// The receive task keeps the connection open until the server closes it or
/// [`Client::close`] is called.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect over TCP and perform the handshake.
    pub async fn dial<A: ToSocketAddrs>(addr: A, config: &ClientConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::connect(stream, config).await
    }

    /// Connect over a Unix domain socket and perform the handshake.
    #[cfg(unix)]
    pub async fn dial_unix<P: AsRef<std::path::Path>>(path: P, config: &ClientConfig) -> Result<Self> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        Self::connect(stream, config).await
    }

    /// Perform the handshake over an established stream and start the
    /// client.
    ///
    /// # Errors
    ///
    /// Fails if the option names an unknown codec or cannot be written.
    pub async fn connect<S>(stream: S, config: &ClientConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let option = HandshakeOption::normalize(Some(config.option.clone()));
        let codec_type = option.codec()?;

        let (read_half, mut write_half) = tokio::io::split(stream);
        write_option(&mut write_half, &option).await?;

        let codec = Codec::new(codec_type, read_half, write_half)
            .with_max_record_size(config.max_record_size);
        Ok(Self::with_codec(codec))
    }

    /// Start a client over an already negotiated codec.
    ///
    /// Spawns the receive task, so this must be called inside a tokio
    /// runtime.
    pub fn with_codec<R, W>(codec: Codec<R, W>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let codec_type = codec.codec_type();
        let (reader, writer) = codec.into_split();

        let inner = Arc::new(ClientInner {
            codec_type,
            sending: AsyncMutex::new(writer.boxed()),
            state: Mutex::new(ClientState {
                seq: 0,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            closed: Notify::new(),
        });

        tokio::spawn(receive(inner.clone(), reader));

        Self { inner }
    }

    /// The negotiated codec.
    pub fn codec_type(&self) -> CodecType {
        self.inner.codec_type
    }

    /// Check whether the client still accepts calls.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock();
        !state.closing && !state.shutdown
    }

    /// Start a call and return once the request is written.
    ///
    /// The completed [`Call`] is delivered on `done`, which may be shared by
    /// several calls. If `done` has no free capacity when the call
    /// completes, the result is dropped with a warning.
    ///
    /// The request is written by a separate task, so dropping this future
    /// never leaves a partial request on the wire.
    pub async fn go<A, R>(&self, service_method: &str, args: &A, done: mpsc::Sender<Call<R>>)
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.send(service_method, args, done).await;
    }

    /// Call a method and wait for its reply.
    ///
    /// Dropping the future after the request is written removes the call
    /// from the pending table; a late reply is then discarded.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let (done, mut completed) = mpsc::channel(1);
        let _pending = self
            .send(service_method, args, done)
            .await
            .map(|seq| PendingGuard {
                inner: &self.inner,
                seq,
            });

        match completed.recv().await {
            Some(call) => call.into_result(),
            None => Err(RpcError::Shutdown),
        }
    }

    /// Encode the argument, then register and write the call on its own
    /// task. Returns the sequence number if the call was registered.
    async fn send<A, R>(
        &self,
        service_method: &str,
        args: &A,
        done: mpsc::Sender<Call<R>>,
    ) -> Option<u64>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let codec_type = self.inner.codec_type;
        let body = match codec_type.encode(args) {
            Ok(body) => body,
            Err(e) => {
                deliver(&done, Call::failed(service_method, 0, e));
                return None;
            }
        };

        let call = PendingCall {
            service_method: service_method.to_string(),
            complete: completion(codec_type, service_method.to_string(), done),
        };
        let write = tokio::spawn(write_call(self.inner.clone(), call, body));
        write.await.ok().flatten()
    }

    /// Close the connection.
    ///
    /// Every pending call completes with [`RpcError::Shutdown`] and later
    /// calls fail the same way without touching the wire.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Shutdown`] if the client is already closing.
    pub async fn close(&self) -> Result<()> {
        let pending = {
            let mut state = self.inner.state.lock();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
            std::mem::take(&mut state.pending)
        };

        self.inner.closed.notify_one();
        for (seq, call) in pending {
            (call.complete)(seq, Err(RpcError::Shutdown));
        }

        self.inner.sending.lock().await.close().await
    }
}

/// Take the send gate, register the call and write the request.
async fn write_call(inner: Arc<ClientInner>, call: PendingCall, body: Vec<u8>) -> Option<u64> {
    let mut sending = inner.sending.lock().await;

    let header_method = call.service_method.clone();
    let seq = match inner.register_call(call) {
        Ok(seq) => seq,
        Err(call) => {
            (call.complete)(0, Err(RpcError::Shutdown));
            return None;
        }
    };

    let header = Header::new(header_method, seq);
    let written = sending.write_raw(&header, &body).await;
    drop(sending);

    if let Err(e) = written {
        // The receive task may already have taken the call.
        if let Some(call) = inner.remove_call(seq) {
            (call.complete)(seq, Err(e));
        }
    }
    Some(seq)
}

/// Removes a call from the pending table when its caller stops waiting.
struct PendingGuard<'a> {
    inner: &'a ClientInner,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.remove_call(self.seq).is_some() {
            debug!("rpc client: caller of seq={} stopped waiting", self.seq);
        }
    }
}

/// Build the completion for a call expecting an `R` reply.
fn completion<R>(codec_type: CodecType, service_method: String, done: mpsc::Sender<Call<R>>) -> Completion
where
    R: DeserializeOwned + Send + 'static,
{
    Box::new(move |seq: u64, result: Result<Bytes>| {
        let mut call = Call {
            service_method,
            seq,
            reply: None,
            error: None,
        };
        match result.and_then(|body| {
            codec_type
                .decode::<R>(&body)
                .map_err(|e| RpcError::BodyDecode(e.to_string()))
        }) {
            Ok(reply) => call.reply = Some(reply),
            Err(e) => call.error = Some(e),
        }
        deliver(&done, call);
    })
}

fn deliver<R>(done: &mpsc::Sender<Call<R>>, call: Call<R>) {
    match done.try_send(call) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(call)) => {
            warn!(
                "rpc client: discarding {} seq={} reply due to insufficient done channel capacity",
                call.service_method, call.seq
            );
        }
        Err(mpsc::error::TrySendError::Closed(call)) => {
            debug!(
                "rpc client: caller of {} seq={} is gone",
                call.service_method, call.seq
            );
        }
    }
}

/// Receive task: the single reader of the connection.
async fn receive<R>(inner: Arc<ClientInner>, mut reader: CodecReader<R>)
where
    R: AsyncRead + Unpin,
{
    let err = loop {
        let header = tokio::select! {
            biased;
            _ = inner.closed.notified() => break RpcError::Shutdown,
            header = reader.read_header() => header,
        };
        let header = match header {
            Ok(header) => header,
            Err(e) => break e,
        };

        let Some(call) = inner.remove_call(header.seq) else {
            debug!("rpc client: discarding response for unknown seq={}", header.seq);
            if let Err(e) = reader.discard_body().await {
                break e;
            }
            continue;
        };

        if header.is_error() {
            let discarded = reader.discard_body().await;
            (call.complete)(header.seq, Err(RpcError::Application(header.error)));
            if let Err(e) = discarded {
                break e;
            }
            continue;
        }

        match reader.read_body_raw().await {
            Ok(body) => (call.complete)(header.seq, Ok(body)),
            Err(e) => {
                (call.complete)(header.seq, Err(RpcError::Disconnected(e.to_string())));
                break e;
            }
        }
    };

    match &err {
        RpcError::Shutdown | RpcError::ConnectionClosed => {
            debug!("rpc client: receive task stopped: {}", err)
        }
        _ => warn!("rpc client: receive task stopped: {}", err),
    }
    inner.terminate_calls(&err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EmptyBody;
    use crate::protocol::read_option;
    use tokio::io::{duplex, split, BufReader, DuplexStream, ReadHalf, WriteHalf};

    type ServerCodec = Codec<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    /// A client connected to a hand-driven server codec.
    async fn pair(codec_type: CodecType) -> (Client, ServerCodec) {
        pair_with(ClientConfig::with_codec(codec_type), 64 * 1024).await
    }

    async fn pair_with(config: ClientConfig, buffer: usize) -> (Client, ServerCodec) {
        let codec_type = config.option.codec().unwrap();
        let (client_end, server_end) = duplex(buffer);
        let client = Client::connect(client_end, &config).await.unwrap();

        let (read_half, write_half) = split(server_end);
        let mut reader = BufReader::new(read_half);
        let option = read_option(&mut reader).await.unwrap();
        assert_eq!(option.validate(&CodecType::ALL).unwrap(), codec_type);

        (client, Codec::from_buffered(codec_type, reader, write_half))
    }

    #[test]
    fn test_call_into_result() {
        let ok = Call {
            service_method: "A.B".to_string(),
            seq: 1,
            reply: Some(5u8),
            error: None,
        };
        assert_eq!(ok.into_result().unwrap(), 5);

        let failed: Call<u8> = Call::failed("A.B", 2, RpcError::Shutdown);
        assert!(matches!(failed.into_result(), Err(RpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_config_normalizes_option() {
        let (client_end, server_end) = duplex(1024);
        let config = ClientConfig {
            option: HandshakeOption {
                magic_number: 0,
                codec_type: String::new(),
            },
            ..ClientConfig::default()
        };
        let client = Client::connect(client_end, &config).await.unwrap();
        assert_eq!(client.codec_type(), CodecType::MsgPack);

        let mut reader = BufReader::new(server_end);
        let option = read_option(&mut reader).await.unwrap();
        assert_eq!(option, HandshakeOption::default());
    }

    #[tokio::test]
    async fn test_unknown_codec_fails_connect() {
        let (client_end, _server_end) = duplex(1024);
        let config = ClientConfig {
            option: HandshakeOption {
                magic_number: 0,
                codec_type: "gob".to_string(),
            },
            ..ClientConfig::default()
        };

        assert!(matches!(
            Client::connect(client_end, &config).await,
            Err(RpcError::UnsupportedCodec(_))
        ));
    }

    #[tokio::test]
    async fn test_sequence_numbers_and_out_of_order_replies() {
        for codec_type in CodecType::ALL {
            let (client, mut server) = pair(codec_type).await;
            let (done, mut completed) = mpsc::channel::<Call<String>>(3);

            for i in 0..3 {
                client.go("Echo.Do", &format!("arg {i}"), done.clone()).await;
            }

            let mut seqs = Vec::new();
            for _ in 0..3 {
                let header = server.read_header().await.unwrap();
                let arg: String = server.read_body().await.unwrap();
                assert_eq!(arg, format!("arg {}", header.seq));
                seqs.push(header.seq);
            }
            assert_eq!(seqs, vec![0, 1, 2]);

            for seq in seqs.iter().rev() {
                server
                    .write(&Header::new("Echo.Do", *seq), &format!("reply {seq}"))
                    .await
                    .unwrap();
            }

            let mut order = Vec::new();
            for _ in 0..3 {
                let call = completed.recv().await.unwrap();
                assert!(call.error.is_none());
                assert_eq!(call.reply.unwrap(), format!("reply {}", call.seq));
                order.push(call.seq);
            }
            assert_eq!(order, vec![2, 1, 0]);
        }
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let (client, mut server) = pair(CodecType::Json).await;

        let responder = tokio::spawn(async move {
            let header = server.read_header().await.unwrap();
            let (a, b): (i64, i64) = server.read_body().await.unwrap();
            server.write(&header, &(a + b)).await.unwrap();
            server
        });

        let sum: i64 = client.call("Arith.Add", &(2, 3)).await.unwrap();
        assert_eq!(sum, 5);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_text_leaves_reply_empty() {
        let (client, mut server) = pair(CodecType::MsgPack).await;
        let (done, mut completed) = mpsc::channel::<Call<String>>(1);

        client.go("Fail.Always", &(), done).await;

        let mut header = server.read_header().await.unwrap();
        server.discard_body().await.unwrap();
        header.error = "boom".to_string();
        server.write(&header, &EmptyBody {}).await.unwrap();

        let call = completed.recv().await.unwrap();
        assert_eq!(call.seq, 0);
        assert!(call.reply.is_none());
        assert!(matches!(call.error, Some(RpcError::Application(ref text)) if text == "boom"));
        assert!(client.is_available());
    }

    #[tokio::test]
    async fn test_orphan_response_is_discarded() {
        let (client, mut server) = pair(CodecType::Json).await;

        let responder = tokio::spawn(async move {
            let header = server.read_header().await.unwrap();
            server.discard_body().await.unwrap();

            server
                .write(&Header::new("Echo.Do", 99), &"nobody asked")
                .await
                .unwrap();
            server.write(&header, &"expected").await.unwrap();
            server
        });

        let reply: String = client.call("Echo.Do", "x").await.unwrap();
        assert_eq!(reply, "expected");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_decode_failure_is_per_call() {
        let (client, mut server) = pair(CodecType::MsgPack).await;

        let responder = tokio::spawn(async move {
            let header = server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
            server.write(&header, &"not a number").await.unwrap();

            let header = server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
            server.write(&header, &7u32).await.unwrap();
            server
        });

        let result: Result<u32> = client.call("Num.Get", &()).await;
        assert!(matches!(result, Err(RpcError::BodyDecode(_))));

        let n: u32 = client.call("Num.Get", &()).await.unwrap();
        assert_eq!(n, 7);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_encode_failure_skips_registration() {
        let (client, mut server) = pair(CodecType::Json).await;
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1);

        let result: Result<()> = client.call("A.B", &bad).await;
        assert!(matches!(result, Err(RpcError::Json(_))));

        let (done, _completed) = mpsc::channel::<Call<()>>(1);
        client.go("A.B", &(), done).await;
        assert_eq!(server.read_header().await.unwrap().seq, 0);
    }

    #[tokio::test]
    async fn test_close_terminates_pending_calls() {
        let (client, mut server) = pair(CodecType::MsgPack).await;
        let (done, mut completed) = mpsc::channel::<Call<String>>(2);

        client.go("Slow.Do", "a", done.clone()).await;
        client.go("Slow.Do", "b", done.clone()).await;
        for _ in 0..2 {
            server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
        }

        client.close().await.unwrap();
        assert!(!client.is_available());

        for _ in 0..2 {
            let call = completed.recv().await.unwrap();
            assert!(matches!(call.error, Some(RpcError::Shutdown)));
            assert!(call.reply.is_none());
        }

        let result: Result<String> = client.call("Slow.Do", "c").await;
        assert!(matches!(result, Err(RpcError::Shutdown)));
        assert!(matches!(
            server.read_header().await,
            Err(RpcError::ConnectionClosed)
        ));

        assert!(matches!(client.close().await, Err(RpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_server_eof_disconnects_pending_calls() {
        let (client, mut server) = pair(CodecType::Json).await;
        let (done, mut completed) = mpsc::channel::<Call<String>>(1);

        client.go("Echo.Do", "x", done).await;
        server.read_header().await.unwrap();
        server.discard_body().await.unwrap();
        server.close().await.unwrap();

        let call = completed.recv().await.unwrap();
        assert!(matches!(call.error, Some(RpcError::Disconnected(_))));
        assert!(!client.is_available());

        let result: Result<String> = client.call("Echo.Do", "y").await;
        assert!(matches!(result, Err(RpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_full_done_channel_drops_completion() {
        let (client, mut server) = pair(CodecType::Json).await;
        let (done, mut completed) = mpsc::channel::<Call<String>>(1);

        client.go("Echo.Do", "a", done.clone()).await;
        client.go("Echo.Do", "b", done.clone()).await;
        for _ in 0..2 {
            let header = server.read_header().await.unwrap();
            let arg: String = server.read_body().await.unwrap();
            server.write(&header, &arg).await.unwrap();
        }

        while !client.inner.state.lock().pending.is_empty() {
            tokio::task::yield_now().await;
        }

        let first = completed.recv().await.unwrap();
        assert_eq!(first.reply.as_deref(), Some("a"));

        // The second reply found the channel full and was dropped.
        client.close().await.unwrap();
        drop(done);
        assert!(completed.recv().await.is_none());
    }

    fn pending_seqs(client: &Client) -> Vec<u64> {
        let mut seqs: Vec<u64> = client.inner.state.lock().pending.keys().copied().collect();
        seqs.sort_unstable();
        seqs
    }

    async fn wait_until_idle(client: &Client) {
        while !pending_seqs(client).is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_call_futures_are_send() {
        let (client, _server) = pair(CodecType::Json).await;
        let worker = client.clone();

        let task = tokio::spawn(async move {
            let result: Result<String> = worker.call("Echo.Do", "x").await;
            result
        });
        client.close().await.unwrap();

        assert!(matches!(task.await.unwrap(), Err(RpcError::Shutdown)));
    }

    #[tokio::test]
    async fn test_oversized_request_fails_without_losing_the_connection() {
        let config = ClientConfig {
            max_record_size: 64,
            ..ClientConfig::with_codec(CodecType::MsgPack)
        };
        let (client, mut server) = pair_with(config, 64 * 1024).await;

        let result: Result<String> = client.call("Echo.Do", &"x".repeat(200)).await;
        assert!(matches!(result, Err(RpcError::RecordTooLarge { .. })));
        assert!(pending_seqs(&client).is_empty());
        assert!(client.is_available());

        let responder = tokio::spawn(async move {
            let header = server.read_header().await.unwrap();
            let arg: String = server.read_body().await.unwrap();
            server.write(&header, &arg).await.unwrap();
            header.seq
        });

        let reply: String = client.call("Echo.Do", "small").await.unwrap();
        assert_eq!(reply, "small");
        assert_eq!(responder.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_call_still_writes_whole_request() {
        let (client, mut server) = pair_with(ClientConfig::with_codec(CodecType::Json), 256).await;

        let big = "x".repeat(4096);
        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            client.call::<_, String>("Echo.Do", &big),
        )
        .await;
        assert!(timed_out.is_err());

        // The request completes on the wire and is answered; the late reply
        // is discarded.
        let header = server.read_header().await.unwrap();
        assert_eq!(header.seq, 0);
        let arg: String = server.read_body().await.unwrap();
        assert_eq!(arg.len(), 4096);
        server.write(&header, &"late").await.unwrap();
        wait_until_idle(&client).await;

        let responder = tokio::spawn(async move {
            let header = server.read_header().await.unwrap();
            let arg: String = server.read_body().await.unwrap();
            server.write(&header, &arg).await.unwrap();
            header.seq
        });

        let reply: String = client.call("Echo.Do", "small").await.unwrap();
        assert_eq!(reply, "small");
        assert_eq!(responder.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropped_call_leaves_pending_table() {
        let (client, mut server) = pair(CodecType::MsgPack).await;

        let waiting = tokio::spawn({
            let client = client.clone();
            async move {
                let result: Result<String> = client.call("Slow.Do", "x").await;
                result
            }
        });

        let header = server.read_header().await.unwrap();
        server.discard_body().await.unwrap();
        while pending_seqs(&client) != vec![header.seq] {
            tokio::task::yield_now().await;
        }

        waiting.abort();
        assert!(waiting.await.unwrap_err().is_cancelled());
        assert!(pending_seqs(&client).is_empty());

        // The reply arrives after the caller left and is discarded.
        server.write(&header, &"late").await.unwrap();

        let responder = tokio::spawn(async move {
            let header = server.read_header().await.unwrap();
            server.discard_body().await.unwrap();
            server.write(&header, &"fresh").await.unwrap();
        });
        let reply: String = client.call("Slow.Do", "y").await.unwrap();
        assert_eq!(reply, "fresh");
        responder.await.unwrap();
    }
}
