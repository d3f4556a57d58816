//! MsgPack codec using `rmp-serde`.
//!
//! Always use `to_vec_named`, never `to_vec`: structs are written as maps
//! (with field names) so that peers decoding into a differently ordered
//! struct, or into a dynamic value, still see the field names.
//!
//! # Example
//!
//! ```
//! use seqwire::codec::{Header, MsgPackCodec};
//!
//! let header = Header::new("Arith.Add", 3);
//! let encoded = MsgPackCodec::encode(&header).unwrap();
//! let decoded: Header = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded.seq, 3);
//! assert!(decoded.error.is_empty());
//! ```

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
