//! Connection handshake option.
//!
//! The option is the first thing on every connection. It is always JSON on a
//! single `\n`-terminated line, whatever codec it selects, so the server can
//! pick the codec before reading anything else:
//!
//! ```text
//! {"magic_number":3927900,"codec_type":"msgpack"}\n
//! Header1 Body1 Header2 Body2 ...
//! ```
//!
//! # Example
//!
//! ```
//! use seqwire::protocol::{HandshakeOption, MAGIC_NUMBER};
//! use seqwire::codec::CodecType;
//!
//! let option = HandshakeOption::normalize(Some(HandshakeOption {
//!     magic_number: 1,
//!     codec_type: String::new(),
//! }));
//! assert_eq!(option.magic_number, MAGIC_NUMBER);
//! assert_eq!(option.codec().unwrap(), CodecType::MsgPack);
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use super::record::{read_line, LINE_DELIMITER};
use crate::codec::CodecType;
use crate::error::{Result, RpcError};

/// Fixed constant identifying the protocol.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Maximum length of the option line.
pub const MAX_OPTION_LINE: usize = 4096;

/// Codec used when the client does not name one.
pub const DEFAULT_CODEC: CodecType = CodecType::MsgPack;

/// Negotiation record sent once, first, on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeOption {
    /// Must equal [`MAGIC_NUMBER`].
    pub magic_number: u32,
    /// Wire name of the body codec (`"msgpack"` or `"json"`).
    pub codec_type: String,
}

impl HandshakeOption {
    /// Create an option selecting the given codec.
    pub fn new(codec: CodecType) -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: codec.as_str().to_string(),
        }
    }

    /// Fill in client-side defaults.
    ///
    /// `None` yields the default option. Otherwise the magic number is forced
    /// to [`MAGIC_NUMBER`] and an empty codec type becomes [`DEFAULT_CODEC`].
    pub fn normalize(option: Option<Self>) -> Self {
        let Some(mut option) = option else {
            return Self::default();
        };
        option.magic_number = MAGIC_NUMBER;
        if option.codec_type.is_empty() {
            option.codec_type = DEFAULT_CODEC.as_str().to_string();
        }
        option
    }

    /// Resolve the named codec.
    pub fn codec(&self) -> Result<CodecType> {
        self.codec_type.parse()
    }

    /// Server-side validation: check the magic number, then that the codec is
    /// known and among `enabled`.
    pub fn validate(&self, enabled: &[CodecType]) -> Result<CodecType> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::InvalidMagicNumber(self.magic_number));
        }
        let codec = self.codec()?;
        if !enabled.contains(&codec) {
            return Err(RpcError::UnsupportedCodec(self.codec_type.clone()));
        }
        Ok(codec)
    }
}

impl Default for HandshakeOption {
    fn default() -> Self {
        Self::new(DEFAULT_CODEC)
    }
}

/// Write the option line and flush it.
pub async fn write_option<W>(writer: &mut W, option: &HandshakeOption) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(option)?;
    line.push(LINE_DELIMITER);
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the option line.
///
/// Reads through a buffered reader; any bytes that arrived after the line
/// stay in the reader's buffer for the codec.
pub async fn read_option<R>(reader: &mut R) -> Result<HandshakeOption>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(128);
    let line = read_line(reader, MAX_OPTION_LINE, &mut buf).await?;
    Ok(serde_json::from_slice(&line)?)
}
