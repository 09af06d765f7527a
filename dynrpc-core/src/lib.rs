//! # dynrpc core
//!
//! `dynrpc-core` is the engine behind the `dynrpc` CLI. It invokes any gRPC method from JSON
//! text without compile-time knowledge of the Protobuf schema.
//!
//! ## Key Components
//!
//! * **[`descriptor::DescriptorRegistry`]:** An incrementally built pool of file descriptors that
//!   enforces dependency ordering and symbol uniqueness.
//! * **[`source::DescriptorSource`]:** The capability shared by [`source::ReflectionSource`]
//!   (schema fetched from a live server) and [`source::ProtosetSource`] (schema read from
//!   precompiled descriptor sets).
//! * **[`codec`]:** Descriptor-driven JSON <-> `DynamicMessage` <-> wire transcoding.
//! * **[`grpc::Invoker`]:** Drives the four gRPC call shapes over any `tonic` service, with
//!   deadlines and cooperative cancellation.
//! * **[`client::DynamicClient`]:** Glues a source and an invoker together: resolve a method by
//!   name, pick the call shape from its streaming flags, run it.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod client;
pub mod codec;
pub mod descriptor;
pub mod grpc;
pub mod source;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
