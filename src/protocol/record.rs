//! Record framing.
//!
//! Every header and every body travels as one self-delimited record. Two
//! framings exist, one per encoding:
//!
//! ```text
//! length-prefixed (binary):  ┌──────────────┬──────────────────┐
//!                            │ Length       │ Payload          │
//!                            │ uint32 BE    │ Length bytes     │
//!                            └──────────────┴──────────────────┘
//!
//! line-delimited (text):     ┌──────────────────────┬────┐
//!                            │ Payload (no '\n')    │ \n │
//!                            └──────────────────────┴────┘
//! ```
//!
//! A record is always read in full before it is decoded, so a payload that
//! fails to decode leaves the stream positioned at the next record.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::error::{Result, RpcError};

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum record size (64 MiB).
pub const DEFAULT_MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Record delimiter for line framing.
pub const LINE_DELIMITER: u8 = b'\n';

/// Encode a record length as a big-endian prefix.
///
/// # Errors
///
/// Returns `RecordTooLarge` if `len` exceeds `max` or does not fit in 32 bits.
pub fn encode_length_prefix(len: usize, max: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let max = max.min(u32::MAX as usize);
    if len > max {
        return Err(RpcError::RecordTooLarge { size: len, max });
    }
    Ok((len as u32).to_be_bytes())
}

/// Append one length-prefixed record to `frame`.
///
/// Nothing is appended if the record is rejected.
pub fn write_prefixed(frame: &mut Vec<u8>, payload: &[u8], max: usize) -> Result<()> {
    let prefix = encode_length_prefix(payload.len(), max)?;
    frame.extend_from_slice(&prefix);
    frame.extend_from_slice(payload);
    Ok(())
}

/// Read one length-prefixed record.
///
/// Returns `ConnectionClosed` if the stream ends cleanly before the first
/// prefix byte, and an `UnexpectedEof` I/O error if it ends mid-record.
pub async fn read_prefixed<R>(reader: &mut R, max: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    if !read_exact_or_eof(reader, &mut prefix).await? {
        return Err(RpcError::ConnectionClosed);
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max {
        return Err(RpcError::RecordTooLarge { size: len, max });
    }

    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await?;
    Ok(payload.freeze())
}

/// Append one line-delimited record to `frame`.
///
/// # Errors
///
/// Returns a protocol error if the payload itself contains the delimiter.
/// Nothing is appended if the record is rejected.
pub fn write_line(frame: &mut Vec<u8>, payload: &[u8], max: usize) -> Result<()> {
    if payload.len() > max {
        return Err(RpcError::RecordTooLarge {
            size: payload.len(),
            max,
        });
    }
    if payload.contains(&LINE_DELIMITER) {
        return Err(RpcError::Protocol(
            "line record payload contains a newline".to_string(),
        ));
    }
    frame.extend_from_slice(payload);
    frame.push(LINE_DELIMITER);
    Ok(())
}

/// Read one line-delimited record into `buf` and return it without the
/// delimiter.
///
/// At most `max + 1` bytes are buffered for a single record.
pub async fn read_line<R>(reader: &mut R, max: usize, buf: &mut Vec<u8>) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = (max as u64).saturating_add(1);
    let n = (&mut *reader)
        .take(limit)
        .read_until(LINE_DELIMITER, buf)
        .await?;

    if n == 0 {
        return Err(RpcError::ConnectionClosed);
    }

    if buf.last() != Some(&LINE_DELIMITER) {
        if buf.len() > max {
            return Err(RpcError::RecordTooLarge {
                size: buf.len(),
                max,
            });
        }
        return Err(RpcError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream ended inside a line record",
        )));
    }

    buf.pop();
    Ok(Bytes::copy_from_slice(buf))
}

/// Fill `buf` completely. Returns `Ok(false)` on EOF before the first byte.
async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended inside a length prefix",
            )));
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_prefixed_roundtrip_multiple() {
        let mut wire = Vec::new();
        write_prefixed(&mut wire, b"first", DEFAULT_MAX_RECORD_SIZE).unwrap();
        write_prefixed(&mut wire, b"", DEFAULT_MAX_RECORD_SIZE).unwrap();
        write_prefixed(&mut wire, b"third", DEFAULT_MAX_RECORD_SIZE).unwrap();

        assert_eq!(&wire[..LENGTH_PREFIX_SIZE], &[0, 0, 0, 5]);

        let mut reader = &wire[..];
        let max = DEFAULT_MAX_RECORD_SIZE;
        assert_eq!(&read_prefixed(&mut reader, max).await.unwrap()[..], b"first");
        assert!(read_prefixed(&mut reader, max).await.unwrap().is_empty());
        assert_eq!(&read_prefixed(&mut reader, max).await.unwrap()[..], b"third");
        assert!(matches!(
            read_prefixed(&mut reader, max).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_prefixed_fragmented_delivery() {
        let (mut client, mut server) = duplex(64);

        let writer = tokio::spawn(async move {
            let mut wire = Vec::new();
            write_prefixed(&mut wire, b"fragmented payload", 1024).unwrap();
            for byte in wire {
                client.write_all(&[byte]).await.unwrap();
                client.flush().await.unwrap();
            }
        });

        let record = read_prefixed(&mut server, 1024).await.unwrap();
        assert_eq!(&record[..], b"fragmented payload");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_prefixed_too_large() {
        let wire = 1000u32.to_be_bytes();
        let mut reader = &wire[..];
        let result = read_prefixed(&mut reader, 100).await;

        assert!(matches!(
            result,
            Err(RpcError::RecordTooLarge { size: 1000, max: 100 })
        ));
    }

    #[tokio::test]
    async fn test_prefixed_truncated() {
        let wire = [0u8, 0];
        let mut reader = &wire[..];
        assert!(matches!(
            read_prefixed(&mut reader, 100).await,
            Err(RpcError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
        ));

        let wire = [0u8, 0, 0, 4, b'a'];
        let mut reader = &wire[..];
        assert!(matches!(
            read_prefixed(&mut reader, 100).await,
            Err(RpcError::Io(_))
        ));
    }

    #[test]
    fn test_encode_length_prefix_limit() {
        assert_eq!(encode_length_prefix(258, 1024).unwrap(), [0, 0, 1, 2]);
        assert!(encode_length_prefix(2048, 1024).is_err());
    }

    #[tokio::test]
    async fn test_line_roundtrip() {
        let mut wire = Vec::new();
        write_line(&mut wire, br#"{"a":1}"#, 1024).unwrap();
        write_line(&mut wire, b"null", 1024).unwrap();
        assert_eq!(wire, b"{\"a\":1}\nnull\n");

        let mut reader = BufReader::new(&wire[..]);
        let mut buf = Vec::new();
        assert_eq!(
            &read_line(&mut reader, 1024, &mut buf).await.unwrap()[..],
            br#"{"a":1}"#
        );
        assert_eq!(&read_line(&mut reader, 1024, &mut buf).await.unwrap()[..], b"null");
        assert!(matches!(
            read_line(&mut reader, 1024, &mut buf).await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_rejected_records_append_nothing() {
        let mut wire = b"kept".to_vec();

        let result = write_line(&mut wire, b"a\nb", 1024);
        assert!(matches!(result, Err(RpcError::Protocol(_))));

        let result = write_prefixed(&mut wire, &[0u8; 32], 16);
        assert!(matches!(result, Err(RpcError::RecordTooLarge { size: 32, max: 16 })));

        assert_eq!(wire, b"kept");
    }

    #[tokio::test]
    async fn test_line_unbounded_limit() {
        let wire = b"{}\n";
        let mut reader = BufReader::new(&wire[..]);
        let mut buf = Vec::new();

        let record = read_line(&mut reader, usize::MAX, &mut buf).await.unwrap();
        assert_eq!(&record[..], b"{}");
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let wire = vec![b'x'; 64];
        let mut reader = BufReader::new(&wire[..]);
        let mut buf = Vec::new();
        let result = read_line(&mut reader, 16, &mut buf).await;

        assert!(matches!(result, Err(RpcError::RecordTooLarge { max: 16, .. })));
    }

    #[tokio::test]
    async fn test_line_truncated() {
        let wire = b"no delimiter";
        let mut reader = BufReader::new(&wire[..]);
        let mut buf = Vec::new();
        assert!(matches!(
            read_line(&mut reader, 1024, &mut buf).await,
            Err(RpcError::Io(_))
        ));
    }
}
