//! # Reflection Source
//!
//! A client for `grpc.reflection.v1` that resolves schema lazily, one symbol at a time.
//!
//! A single bidirectional `ServerReflectionInfo` stream is opened on first use and shared by
//! every lookup made through the same [`ReflectionSource`] (a *session*). Files received over
//! the stream are cached by filename: a file is requested at most once per session, and a
//! symbol that is already registered is answered without touching the network.
//!
//! Servers differ in how much they send back for a `FileContainingSymbol` request. Some send
//! the whole import closure, some only the file itself. Imports missing from the cache are
//! therefore requested explicitly with `FileByFilename` until the closure is complete.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use super::{DescriptorSource, SourceError};
use crate::{
    BoxError,
    descriptor::{Descriptor, DescriptorRegistry},
    grpc::metadata::metadata_map,
};
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::{
    collections::{HashMap, HashSet},
    fmt,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Streaming, client::GrpcService, metadata::MetadataMap, transport::Channel};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};
use tracing::{debug, trace};

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

const REQUEST_BUFFER: usize = 100;

/// The open half-duplex pair of one reflection stream.
struct Session {
    requests: mpsc::Sender<ServerReflectionRequest>,
    responses: Streaming<ServerReflectionResponse>,
}

/// A descriptor source backed by a server's reflection service.
pub struct ReflectionSource<S = Channel> {
    client: ServerReflectionClient<S>,
    metadata: MetadataMap,
    session: Option<Session>,
    /// Every file received during this session, keyed by filename.
    cache: HashMap<String, FileDescriptorProto>,
    registry: DescriptorRegistry,
    round_trips: usize,
    cancellation: CancellationToken,
}

impl<S> fmt::Debug for ReflectionSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectionSource")
            .field("session_open", &self.session.is_some())
            .field("cached_files", &self.cache.len())
            .field("round_trips", &self.round_trips)
            .finish_non_exhaustive()
    }
}

impl<S> ReflectionSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            client: ServerReflectionClient::new(service),
            metadata: MetadataMap::new(),
            session: None,
            cache: HashMap::new(),
            registry: DescriptorRegistry::new(),
            round_trips: 0,
            cancellation: CancellationToken::new(),
        }
    }

    /// Attaches metadata (headers) to the reflection stream when it is opened.
    pub fn with_headers(mut self, headers: &[(String, String)]) -> Result<Self, SourceError> {
        self.metadata = metadata_map(headers)?;
        Ok(self)
    }

    /// Aborts any in-flight discovery with [`SourceError::Cancelled`] once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Number of reflection requests sent during this session.
    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        let mut session = self.take_session().await?;

        self.send(&session, MessageRequest::ListServices(String::new()))
            .await?;
        let response = self.next_response(&mut session).await?;

        let services = match response.message_response {
            Some(MessageResponse::ListServicesResponse(resp)) => {
                resp.service.into_iter().map(|s| s.name).collect()
            }
            Some(MessageResponse::ErrorResponse(e)) => {
                self.session = Some(session);
                return Err(SourceError::DiscoveryFailed {
                    code: Code::from_i32(e.error_code),
                    message: e.error_message,
                });
            }
            other => return Err(unexpected(other)),
        };

        self.session = Some(session);
        Ok(services)
    }

    /// Resolves a fully qualified symbol, fetching the file that defines it (and its imports)
    /// from the server when it is not registered yet.
    pub async fn find_symbol(&mut self, symbol: &str) -> Result<Option<Descriptor>, SourceError> {
        if let Some(descriptor) = self.registry.find_symbol(symbol) {
            trace!(symbol, "symbol resolved from cache");
            return Ok(Some(descriptor));
        }

        let mut session = self.take_session().await?;

        // A failed stream is dropped here, the next lookup opens a fresh one.
        let root = self.fetch_symbol(&mut session, symbol).await?;
        self.session = Some(session);

        let Some(root) = root else {
            return Ok(None);
        };

        self.registry.register_resolved(&root, &self.cache)?;
        Ok(self.registry.find_symbol(symbol))
    }

    /// Requests the file containing `symbol` and then every import missing from the cache.
    ///
    /// Returns the name of the file defining the symbol, or `None` if the server reported
    /// that it does not know it.
    async fn fetch_symbol(
        &mut self,
        session: &mut Session,
        symbol: &str,
    ) -> Result<Option<String>, SourceError> {
        self.send(
            session,
            MessageRequest::FileContainingSymbol(symbol.to_string()),
        )
        .await?;

        let mut inflight = 1;
        let mut requested = HashSet::new();
        let mut root = None;

        while inflight > 0 {
            let response = self.next_response(session).await?;
            inflight -= 1;

            match response.message_response {
                Some(MessageResponse::FileDescriptorResponse(res)) => {
                    let names = self.cache_batch(res.file_descriptor_proto)?;

                    if root.is_none() {
                        root = names.first().cloned();
                    }

                    for name in &names {
                        inflight += self
                            .queue_dependencies(session, name, &mut requested)
                            .await?;
                    }
                }
                Some(MessageResponse::ErrorResponse(e))
                    if root.is_none() && e.error_code == Code::NotFound as i32 =>
                {
                    debug!(symbol, "symbol not found by reflection server");
                    return Ok(None);
                }
                Some(MessageResponse::ErrorResponse(e)) => {
                    return Err(SourceError::DiscoveryFailed {
                        code: Code::from_i32(e.error_code),
                        message: e.error_message,
                    });
                }
                other => return Err(unexpected(other)),
            }
        }

        Ok(root)
    }

    /// Decodes a batch of serialized files, caching the ones not seen before.
    ///
    /// Returns the names of every file in the batch, in the order received.
    fn cache_batch(&mut self, raw_protos: Vec<Vec<u8>>) -> Result<Vec<String>, SourceError> {
        let mut names = Vec::with_capacity(raw_protos.len());

        for raw in raw_protos {
            let fd = FileDescriptorProto::decode(raw.as_ref())
                .map_err(crate::descriptor::RegistryError::from)?;
            let name = fd.name().to_string();

            if !self.cache.contains_key(&name) {
                trace!(file = %name, "caching file descriptor");
                self.cache.insert(name.clone(), fd);
            }
            names.push(name);
        }

        Ok(names)
    }

    async fn queue_dependencies(
        &mut self,
        session: &Session,
        file: &str,
        requested: &mut HashSet<String>,
    ) -> Result<usize, SourceError> {
        let missing: Vec<String> = self
            .cache
            .get(file)
            .map(|fd| {
                fd.dependency
                    .iter()
                    .filter(|dep| !self.cache.contains_key(*dep) && !requested.contains(*dep))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for dep in &missing {
            requested.insert(dep.clone());
            self.send(session, MessageRequest::FileByFilename(dep.clone()))
                .await?;
        }

        Ok(missing.len())
    }

    /// Takes the open session out of `self`, opening one if needed.
    ///
    /// Callers put the session back once an exchange succeeds.
    async fn take_session(&mut self) -> Result<Session, SourceError> {
        if let Some(session) = self.session.take() {
            return Ok(session);
        }

        let (requests, rx) = mpsc::channel(REQUEST_BUFFER);
        let mut request = tonic::Request::new(ReceiverStream::new(rx));
        *request.metadata_mut() = self.metadata.clone();

        debug!("opening reflection stream");

        let responses = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(SourceError::Cancelled),
            response = self.client.server_reflection_info(request) => {
                response.map_err(discovery_failed)?.into_inner()
            }
        };

        Ok(Session {
            requests,
            responses,
        })
    }

    async fn send(
        &mut self,
        session: &Session,
        request: MessageRequest,
    ) -> Result<(), SourceError> {
        debug!(?request, "sending reflection request");

        session
            .requests
            .send(ServerReflectionRequest {
                host: EMPTY_HOST.to_string(),
                message_request: Some(request),
            })
            .await
            .map_err(|_| SourceError::StreamClosed)?;

        self.round_trips += 1;
        Ok(())
    }

    async fn next_response(
        &self,
        session: &mut Session,
    ) -> Result<ServerReflectionResponse, SourceError> {
        let message = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(SourceError::Cancelled),
            message = session.responses.message() => message,
        };

        message
            .map_err(discovery_failed)?
            .ok_or(SourceError::StreamClosed)
    }
}

impl<S> DescriptorSource for ReflectionSource<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn list_services(&mut self) -> Result<Vec<String>, SourceError> {
        ReflectionSource::list_services(self).await
    }

    async fn find_symbol(&mut self, name: &str) -> Result<Option<Descriptor>, SourceError> {
        ReflectionSource::find_symbol(self, name).await
    }

    fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }
}

fn discovery_failed(status: tonic::Status) -> SourceError {
    SourceError::DiscoveryFailed {
        code: status.code(),
        message: status.message().to_string(),
    }
}

fn unexpected(response: Option<MessageResponse>) -> SourceError {
    match response {
        Some(other) => SourceError::UnexpectedResponse(format!("{other:?}")),
        None => SourceError::UnexpectedResponse("Empty Message".into()),
    }
}
