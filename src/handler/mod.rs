//! Handler module - method registration and dispatch.
//!
//! Provides:
//! - [`MethodRegistry`] - maps `Service.Method` names to typed handlers
//! - [`RequestContext`] - what a handler knows about its request
//!
//! # Example
//!
//! ```
//! use seqwire::handler::MethodRegistry;
//!
//! let mut registry = MethodRegistry::new();
//!
//! registry
//!     .register("Arith.Add", |(a, b): (i64, i64), _ctx| async move { Ok(a + b) })
//!     .unwrap();
//!
//! assert!(registry.contains("Arith.Add"));
//! ```

mod context;
mod registry;

pub use context::RequestContext;
pub use registry::{
    split_service_method, BoxFuture, Handler, MethodRegistry, MethodResult, ReplyResult,
    TypedHandler,
};
