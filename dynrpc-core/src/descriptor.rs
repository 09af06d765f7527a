//! # Descriptor Registry
//!
//! Schema metadata is held in a [`DescriptorRegistry`], an append-only pool of file
//! descriptors keyed by filename and by fully qualified symbol name.
//!
//! Files enter the registry as raw `FileDescriptorProto` bytes, whichever source produced
//! them. The registry guarantees that every registered file's imports were registered
//! before it and that no symbol is defined twice.
mod pool;
mod types;

pub use pool::{DescriptorRegistry, RegistryError};
pub use types::Descriptor;
