//! Protocol module - connection handshake and record framing.
//!
//! Wire layout of every connection:
//!
//! ```text
//! | Option (JSON line) | Header1 | Body1 | Header2 | Body2 | ...
//! ```
//!
//! - [`HandshakeOption`]: codec-independent negotiation line
//! - [`record`]: length-prefixed and line-delimited record I/O used by codecs

mod handshake;
pub mod record;

pub use handshake::{
    read_option, write_option, HandshakeOption, DEFAULT_CODEC, MAGIC_NUMBER, MAX_OPTION_LINE,
};
pub use record::{DEFAULT_MAX_RECORD_SIZE, LENGTH_PREFIX_SIZE};
