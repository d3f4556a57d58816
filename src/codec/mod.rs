//! Codec module - header/body records over a byte stream.
//!
//! A codec turns a duplex stream into a sequence of `(Header, Body)` pairs.
//! Two encodings exist and exactly one is used per connection, selected once
//! by the handshake:
//!
//! - [`CodecType::MsgPack`]: binary, MessagePack records with a length prefix
//! - [`CodecType::Json`]: text, one compact JSON value per line
//!
//! # Design
//!
//! [`Codec`] splits into a [`CodecReader`] and a [`CodecWriter`]. The reader
//! belongs to the single reader of a connection. The writer does not lock;
//! callers that share it put it behind a mutex so a header and its body are
//! never interleaved with another write.
//!
//! # Example
//!
//! ```
//! use seqwire::codec::{Codec, CodecType, Header};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (a, b) = tokio::io::duplex(1024);
//! let (a_read, a_write) = tokio::io::split(a);
//! let (b_read, b_write) = tokio::io::split(b);
//! let mut left = Codec::new(CodecType::Json, a_read, a_write);
//! let mut right = Codec::new(CodecType::Json, b_read, b_write);
//!
//! left.write(&Header::new("Echo.Do", 0), &"x").await.unwrap();
//! let header = right.read_header().await.unwrap();
//! let body: String = right.read_body().await.unwrap();
//! assert_eq!(header.service_method, "Echo.Do");
//! assert_eq!(body, "x");
//! # }
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Result, RpcError};
use crate::protocol::record;

/// Boxed write half, used where the concrete stream type is erased.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Body encoding selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// MessagePack, length-prefixed records.
    MsgPack,
    /// JSON, newline-delimited records.
    Json,
}

impl CodecType {
    /// Every built-in codec.
    pub const ALL: [CodecType; 2] = [CodecType::MsgPack, CodecType::Json];

    /// Wire name used in the handshake option.
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecType::MsgPack => "msgpack",
            CodecType::Json => "json",
        }
    }

    /// Encode a value with this codec.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecType::MsgPack => MsgPackCodec::encode(value),
            CodecType::Json => JsonCodec::encode(value),
        }
    }

    /// Decode a value with this codec.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::MsgPack => MsgPackCodec::decode(bytes),
            CodecType::Json => JsonCodec::decode(bytes),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecType {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        CodecType::ALL
            .into_iter()
            .find(|codec| codec.as_str() == s)
            .ok_or_else(|| RpcError::UnsupportedCodec(s.to_string()))
    }
}

/// Header preceding every body on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Target method, `"Service.Method"`.
    pub service_method: String,
    /// Call correlation id chosen by the client.
    pub seq: u64,
    /// Error text; empty means success.
    pub error: String,
}

impl Header {
    /// Create a request header with an empty error.
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Check if this header carries an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Body sent alongside an error header. Encodes as an empty map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyBody {}

/// Which record the reader expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Header,
    Body,
}

/// Read side of a codec.
pub struct CodecReader<R> {
    codec_type: CodecType,
    reader: BufReader<R>,
    max_record_size: usize,
    line_buf: Vec<u8>,
    expect: Expect,
}

impl<R: AsyncRead + Unpin> CodecReader<R> {
    fn new(codec_type: CodecType, reader: BufReader<R>) -> Self {
        Self {
            codec_type,
            reader,
            max_record_size: record::DEFAULT_MAX_RECORD_SIZE,
            line_buf: Vec::new(),
            expect: Expect::Header,
        }
    }

    /// The codec this reader decodes with.
    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    /// Read the next header. Must precede every body read.
    pub async fn read_header(&mut self) -> Result<Header> {
        if self.expect != Expect::Header {
            return Err(RpcError::Protocol(
                "read_header called before the previous body was read".to_string(),
            ));
        }
        let record = self.read_record().await?;
        let header = self.codec_type.decode(&record)?;
        self.expect = Expect::Body;
        Ok(header)
    }

    /// Read the body record without decoding it.
    ///
    /// Errors from here are stream failures: the record boundary is lost.
    pub async fn read_body_raw(&mut self) -> Result<Bytes> {
        if self.expect != Expect::Body {
            return Err(RpcError::Protocol(
                "read_body called without a preceding header".to_string(),
            ));
        }
        let record = self.read_record().await?;
        self.expect = Expect::Header;
        Ok(record)
    }

    /// Read the body and decode it into `T`.
    ///
    /// A decode error leaves the stream positioned at the next header.
    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let record = self.read_body_raw().await?;
        self.codec_type.decode(&record)
    }

    /// Consume and drop the body.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.read_body_raw().await.map(|_| ())
    }

    async fn read_record(&mut self) -> Result<Bytes> {
        match self.codec_type {
            CodecType::MsgPack => {
                record::read_prefixed(&mut self.reader, self.max_record_size).await
            }
            CodecType::Json => {
                record::read_line(&mut self.reader, self.max_record_size, &mut self.line_buf).await
            }
        }
    }
}

/// Write side of a codec.
///
/// A header and its body are assembled into one buffer, written, then
/// flushed.
pub struct CodecWriter<W> {
    codec_type: CodecType,
    writer: W,
    max_record_size: usize,
}

impl<W: AsyncWrite + Unpin> CodecWriter<W> {
    fn new(codec_type: CodecType, writer: W) -> Self {
        Self {
            codec_type,
            writer,
            max_record_size: record::DEFAULT_MAX_RECORD_SIZE,
        }
    }

    /// The codec this writer encodes with.
    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    /// Encode and write a header followed by its body.
    ///
    /// Both are encoded before any byte is written, so an encode error
    /// leaves the stream untouched.
    pub async fn write<B: Serialize + ?Sized>(&mut self, header: &Header, body: &B) -> Result<()> {
        let body = self.codec_type.encode(body)?;
        self.write_raw(header, &body).await
    }

    /// Write a header followed by a body already encoded with this codec.
    ///
    /// Framing errors (oversized record, stray newline) are detected before
    /// any byte is written. An I/O error leaves the stream in an unknown
    /// state; close it.
    pub async fn write_raw(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let frame = self.frame(header, body)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and shut down the underlying stream.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Erase the concrete writer type.
    pub fn boxed(self) -> CodecWriter<BoxedWriter>
    where
        W: Send + 'static,
    {
        CodecWriter {
            codec_type: self.codec_type,
            writer: Box::new(self.writer),
            max_record_size: self.max_record_size,
        }
    }

    /// Encode the header and frame it with the body into one buffer.
    fn frame(&self, header: &Header, body: &[u8]) -> Result<Vec<u8>> {
        let header = self.codec_type.encode(header)?;
        let mut frame =
            Vec::with_capacity(header.len() + body.len() + 2 * record::LENGTH_PREFIX_SIZE);
        for payload in [&header[..], body] {
            match self.codec_type {
                CodecType::MsgPack => {
                    record::write_prefixed(&mut frame, payload, self.max_record_size)?
                }
                CodecType::Json => record::write_line(&mut frame, payload, self.max_record_size)?,
            }
        }
        Ok(frame)
    }
}

/// A negotiated codec over a read half and a write half.
pub struct Codec<R, W> {
    reader: CodecReader<R>,
    writer: CodecWriter<W>,
}

impl<R, W> Codec<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a codec over the two halves of a stream.
    pub fn new(codec_type: CodecType, reader: R, writer: W) -> Self {
        Self::from_buffered(codec_type, BufReader::new(reader), writer)
    }

    /// Create a codec over a reader that may already hold buffered bytes
    /// (e.g. read past the handshake line).
    pub fn from_buffered(codec_type: CodecType, reader: BufReader<R>, writer: W) -> Self {
        Self {
            reader: CodecReader::new(codec_type, reader),
            writer: CodecWriter::new(codec_type, writer),
        }
    }

    /// Set the maximum record size accepted and produced.
    pub fn with_max_record_size(mut self, max: usize) -> Self {
        self.reader.max_record_size = max;
        self.writer.max_record_size = max;
        self
    }

    /// The negotiated codec.
    pub fn codec_type(&self) -> CodecType {
        self.reader.codec_type
    }

    /// See [`CodecReader::read_header`].
    pub async fn read_header(&mut self) -> Result<Header> {
        self.reader.read_header().await
    }

    /// See [`CodecReader::read_body`].
    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.reader.read_body().await
    }

    /// See [`CodecReader::discard_body`].
    pub async fn discard_body(&mut self) -> Result<()> {
        self.reader.discard_body().await
    }

    /// See [`CodecWriter::write`].
    pub async fn write<B: Serialize + ?Sized>(&mut self, header: &Header, body: &B) -> Result<()> {
        self.writer.write(header, body).await
    }

    /// See [`CodecWriter::close`].
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    /// Split into independently owned read and write sides.
    pub fn into_split(self) -> (CodecReader<R>, CodecWriter<W>) {
        (self.reader, self.writer)
    }
}
