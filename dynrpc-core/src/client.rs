//! # Dynamic Client
//!
//! [`DynamicClient`] pairs a [`DescriptorSource`] with an [`Invoker`]: it resolves a method by
//! name, then runs it with the call shape given by the method's streaming flags.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dynrpc_core::{
//!     client::{DynamicClient, DynamicRequest},
//!     grpc::{DynamicResponse, Invoker, transport},
//!     source::ReflectionSource,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = transport::connect("http://localhost:50051", &Default::default()).await?;
//!
//! let source = ReflectionSource::new(channel.clone());
//! let mut client = DynamicClient::new(source, Invoker::new(channel));
//!
//! let request = DynamicRequest::new(
//!     "helloworld.Greeter",
//!     "SayHello",
//!     serde_json::json!({ "name": "World" }),
//! );
//!
//! if let DynamicResponse::Unary(reply) = client.call(request).await? {
//!     println!("{reply}");
//! }
//! # Ok(())
//! # }
//! ```
mod types;

pub use crate::grpc::DynamicResponse;
pub use types::DynamicRequest;

use crate::{
    BoxError,
    descriptor::Descriptor,
    grpc::{InvokeError, Invoker},
    source::{DescriptorSource, SourceError},
};
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use tonic::{client::GrpcService, transport::Channel};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

/// Resolves schema through `Src` and executes calls through an [`Invoker`].
#[derive(Debug)]
pub struct DynamicClient<Src, S = Channel> {
    source: Src,
    invoker: Invoker<S>,
}

impl<Src, S> DynamicClient<Src, S>
where
    Src: DescriptorSource,
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(source: Src, invoker: Invoker<S>) -> Self {
        Self { source, invoker }
    }

    pub fn source(&self) -> &Src {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Src {
        &mut self.source
    }

    pub async fn list_services(&mut self) -> Result<Vec<String>, CallError> {
        Ok(self.source.list_services().await?)
    }

    /// Resolves a service, method, message or enum by its fully qualified name.
    pub async fn describe(&mut self, symbol: &str) -> Result<Descriptor, CallError> {
        self.source
            .resolve_symbol(symbol)
            .await?
            .ok_or_else(|| CallError::SymbolNotFound(symbol.to_string()))
    }

    pub async fn resolve_method(
        &mut self,
        service: &str,
        method: &str,
    ) -> Result<MethodDescriptor, CallError> {
        let service_desc = self
            .source
            .find_symbol(service)
            .await?
            .and_then(|d| d.service_descriptor().cloned())
            .ok_or_else(|| CallError::SymbolNotFound(service.to_string()))?;

        service_desc
            .methods()
            .find(|m| m.name() == method)
            .ok_or_else(|| CallError::MethodNotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }

    /// Executes a dynamic gRPC request.
    pub async fn call(&mut self, request: DynamicRequest) -> Result<DynamicResponse, CallError> {
        let method = self
            .resolve_method(&request.service, &request.method)
            .await?;

        debug!(
            method = method.full_name(),
            client_streaming = method.is_client_streaming(),
            server_streaming = method.is_server_streaming(),
            "resolved method"
        );

        Ok(self
            .invoker
            .invoke(&method, request.body, request.options)
            .await?)
    }

    /// Serialized `FileDescriptorSet` of every file resolved so far.
    pub fn export_descriptor_set(&self) -> Vec<u8> {
        self.source.registry().encode_descriptor_set()
    }
}
