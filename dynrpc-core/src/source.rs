//! # Descriptor Sources
//!
//! A descriptor source produces raw file descriptors and feeds them into the
//! [`DescriptorRegistry`] it owns. Two sources exist:
//!
//! * [`ReflectionSource`] asks a live server through the gRPC Server Reflection Protocol,
//!   fetching schema lazily as symbols are requested.
//! * [`ProtosetSource`] loads one or more precompiled `FileDescriptorSet` files up front.
//!
//! Both implement [`DescriptorSource`], the capability the rest of the crate is written against.
pub mod protoset;
pub mod reflection;

pub use protoset::ProtosetSource;
pub use reflection::ReflectionSource;

use crate::{
    BoxError,
    descriptor::{Descriptor, DescriptorRegistry, RegistryError},
    grpc::metadata::MetadataError,
};
use http_body::Body as HttpBody;
use prost_reflect::FileDescriptor;
use std::path::PathBuf;
use tonic::{client::GrpcService, transport::Channel};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Schema discovery failed with status {code:?}: '{message}'")]
    DiscoveryFailed { code: tonic::Code, message: String },

    #[error("Protocol error: Received unexpected reflection response: {0}")]
    UnexpectedResponse(String),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Schema discovery was cancelled")]
    Cancelled,

    #[error(transparent)]
    InvalidMetadata(#[from] MetadataError),

    #[error("Failed to read descriptor set '{path}': '{source}'")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolves Protobuf schema by symbol name.
pub trait DescriptorSource {
    /// Lists the fully qualified names of the services this source knows about.
    fn list_services(&mut self) -> impl Future<Output = Result<Vec<String>, SourceError>>;

    /// Resolves a fully qualified symbol, fetching its schema if needed.
    ///
    /// Returns `Ok(None)` when the symbol does not exist.
    fn find_symbol(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Descriptor>, SourceError>>;

    /// Like [`find_symbol`](Self::find_symbol), but also resolves `pkg.Service.Method` through
    /// its service when the source cannot look methods up directly.
    fn resolve_symbol(
        &mut self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Descriptor>, SourceError>> {
        async move {
            if let Some(descriptor) = self.find_symbol(name).await? {
                return Ok(Some(descriptor));
            }

            if let Some((parent, _)) = name.rsplit_once('.')
                && self.find_symbol(parent).await?.is_some()
            {
                return Ok(self.registry().find_symbol(name));
            }

            Ok(None)
        }
    }

    /// The registry populated so far.
    fn registry(&self) -> &DescriptorRegistry;

    /// Every file resolved so far, in registration order.
    fn all_files(&self) -> Vec<FileDescriptor> {
        self.registry().all_files()
    }
}

/// Either source, picked at runtime.
#[derive(Debug)]
pub enum SchemaSource<S = Channel> {
    Reflection(ReflectionSource<S>),
    Protoset(ProtosetSource),
}

impl<S> DescriptorSource for SchemaSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        match self {
            SchemaSource::Reflection(source) => ReflectionSource::list_services(source).await,
            SchemaSource::Protoset(source) => Ok(ProtosetSource::list_services(source)),
        }
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Option<Descriptor>, SourceError> {
        match self {
            SchemaSource::Reflection(source) => ReflectionSource::find_symbol(source, name).await,
            SchemaSource::Protoset(source) => Ok(ProtosetSource::find_symbol(source, name)),
        }
    }

    fn registry(&self) -> &DescriptorRegistry {
        match self {
            SchemaSource::Reflection(source) => ReflectionSource::registry(source),
            SchemaSource::Protoset(source) => ProtosetSource::registry(source),
        }
    }
}
