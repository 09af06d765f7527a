//! # Dynamic Invocation
//!
//! Runs gRPC calls whose request and response types are only known at runtime.
//!
//! The [`Invoker`] works on already resolved [`prost_reflect::MethodDescriptor`]s. Requests are
//! transcoded from JSON by [`crate::codec`] before they reach `tonic`, which only ever sees
//! opaque frames (see [`crate::codec::WireCodec`]). Responses are decoded lazily, one frame at a
//! time, as the caller polls the returned [`ResponseStream`].
//!
//! ## Cancellation
//!
//! Each call owns a cancellation token, a child of the optional caller token in
//! [`CallOptions`]. Deadlines, explicit cancellation and request encoding failures all fire that
//! token, and the first reason recorded is the one reported.
mod call;
mod invoker;
pub mod metadata;
pub mod transport;

pub use call::CallState;
pub use invoker::{CallOptions, DynamicResponse, InvokeError, Invoker, ResponseStream};
