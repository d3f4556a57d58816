//! Handler registry for dispatching requests by method name.
//!
//! Each method is registered once with its concrete argument and reply
//! types. The registry stores it behind the object-safe [`Handler`] trait,
//! which decodes the argument with the connection's codec, runs the method
//! and encodes the reply with the same codec.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::handler::MethodRegistry;
//!
//! let mut registry = MethodRegistry::new();
//!
//! registry.register("Echo.Do", |data: String, _ctx| async move { Ok(data) })?;
//!
//! let handler = registry.get("Echo.Do").unwrap();
//! let reply = handler.call(CodecType::Json, br#""hi""#, ctx)?.await;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::RequestContext;
use crate::codec::CodecType;
use crate::error::{Result, RpcError};

/// Return type of a method: the reply, or error text for the client.
pub type MethodResult<R> = std::result::Result<R, String>;

/// Reply already encoded with the connection's codec, or error text.
pub type ReplyResult = std::result::Result<Vec<u8>, String>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for registered methods.
pub trait Handler: Send + Sync + 'static {
    /// Decode the argument from `body` and return the method's future.
    ///
    /// Fails without running the method when the argument does not decode.
    fn call(
        &self,
        codec: CodecType,
        body: &[u8],
        ctx: RequestContext,
    ) -> Result<BoxFuture<'static, ReplyResult>>;
}

/// Wrapper that decodes the argument and encodes the reply around a typed
/// method.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = MethodResult<R>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (Fut, R)>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = MethodResult<R>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Handler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = MethodResult<R>> + Send + 'static,
{
    fn call(
        &self,
        codec: CodecType,
        body: &[u8],
        ctx: RequestContext,
    ) -> Result<BoxFuture<'static, ReplyResult>> {
        let arg: T = codec.decode(body)?;
        let fut = (self.handler)(arg, ctx);

        Ok(Box::pin(async move {
            let reply = fut.await?;
            codec
                .encode(&reply)
                .map_err(|e| format!("rpc server: encode reply error: {e}"))
        }))
    }
}

/// Split `"Service.Method"` into its two parts.
///
/// Exactly one dot with a non-empty name on each side is accepted.
pub fn split_service_method(name: &str) -> Result<(&str, &str)> {
    match name.split_once('.') {
        Some((service, method))
            if !service.is_empty() && !method.is_empty() && !method.contains('.') =>
        {
            Ok((service, method))
        }
        _ => Err(RpcError::InvalidMethodName(name.to_string())),
    }
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    methods: HashMap<String, Box<dyn Handler>>,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register a method handler.
    ///
    /// # Arguments
    ///
    /// * `name` - Method name, `Service.Method`
    /// * `handler` - Takes `(T, RequestContext)` and resolves to `Ok(reply)`
    ///   or `Err(error text)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidMethodName` for a malformed name and `DuplicateMethod`
    /// if the name is taken.
    pub fn register<F, T, R, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = MethodResult<R>> + Send + 'static,
    {
        self.register_boxed(name, Box::new(TypedHandler::new(handler)))
    }

    /// Register an already boxed handler.
    pub fn register_boxed(&mut self, name: &str, handler: Box<dyn Handler>) -> Result<()> {
        split_service_method(name)?;
        if self.methods.contains_key(name) {
            return Err(RpcError::DuplicateMethod(name.to_string()));
        }
        self.methods.insert(name.to_string(), handler);
        Ok(())
    }

    /// Get a handler by method name.
    pub fn get(&self, name: &str) -> Option<&dyn Handler> {
        self.methods.get(name).map(|h| h.as_ref())
    }

    /// Check whether a method is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
