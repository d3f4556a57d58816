//! Request context for handlers.
//!
//! Carries what the server knows about the request besides its argument:
//! the requested method, the client's sequence number and the codec the
//! connection negotiated.
//!
//! # Example
//!
//! ```ignore
//! registry.register("Echo.Do", |arg: String, ctx: RequestContext| async move {
//!     Ok(format!("rpc reply: {}", ctx.seq()))
//! })?;
//! ```

use std::sync::Arc;

use crate::codec::CodecType;

/// Context passed to method handlers.
///
/// `RequestContext` is `Clone` and cheap to move into spawned tasks.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Method name from the request header.
    service_method: Arc<str>,
    /// Sequence number from the request header.
    seq: u64,
    /// Codec of the connection the request arrived on.
    codec_type: CodecType,
}

impl RequestContext {
    /// Create a new request context.
    pub fn new(service_method: &str, seq: u64, codec_type: CodecType) -> Self {
        Self {
            service_method: Arc::from(service_method),
            seq,
            codec_type,
        }
    }

    /// Get the `Service.Method` name.
    #[inline]
    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Get the service part of the method name.
    pub fn service(&self) -> &str {
        self.service_method
            .split_once('.')
            .map_or(&*self.service_method, |(service, _)| service)
    }

    /// Get the request sequence number.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Get the connection's codec.
    #[inline]
    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_accessors() {
        let ctx = RequestContext::new("Arith.Add", 42, CodecType::Json);
        assert_eq!(ctx.service_method(), "Arith.Add");
        assert_eq!(ctx.service(), "Arith");
        assert_eq!(ctx.seq(), 42);
        assert_eq!(ctx.codec_type(), CodecType::Json);
    }

    #[test]
    fn test_context_is_clone() {
        let ctx = RequestContext::new("Echo.Do", 1, CodecType::MsgPack);
        let ctx2 = ctx.clone();

        assert_eq!(ctx.service_method(), ctx2.service_method());
        assert_eq!(ctx.seq(), ctx2.seq());
    }
}
