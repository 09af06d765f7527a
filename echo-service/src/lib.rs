//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide gRPC server traits
//! and a descriptor set for integration testing `dynrpc_core`.
//! It is not intended for production use.
//!
//! The descriptor set embeds `echo.proto`, `types.proto` and the well-known
//! `google/protobuf/*` files they import.

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/echo.rs"));
}

pub use pb::echo_service_server::{EchoService, EchoServiceServer};
pub use pb::greeter_server::{Greeter, GreeterServer};
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");
