use super::{
    call::{CallControl, CallState, Interruption},
    metadata::{MetadataError, metadata_map},
};
use crate::{
    BoxError,
    codec::{CodecError, JsonOptions, WireCodec, from_json_value, from_wire, to_json_value, to_wire},
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use http_body::Body as HttpBody;
use prost_reflect::{MessageDescriptor, MethodDescriptor};
use serde_json::Value;
use std::{
    fmt,
    pin::Pin,
    str::FromStr,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status, Streaming, client::GrpcService, transport::Channel};
use tracing::{debug, trace, warn};

const SEND_BUFFER: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("RPC failed with status {code:?}: '{message}'")]
    RpcFailed {
        code: Code,
        message: String,
        details: Bytes,
    },

    #[error("Call was cancelled")]
    Cancelled,

    #[error("Expected exactly one response message, received {received}")]
    UnexpectedResponseCount { received: usize },

    #[error(transparent)]
    InvalidMetadata(#[from] MetadataError),

    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),

    #[error("Streaming calls require a JSON array body")]
    NotAStreamingRequest,
}

impl From<Status> for InvokeError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::DeadlineExceeded => InvokeError::DeadlineExceeded,
            code => InvokeError::RpcFailed {
                code,
                message: status.message().to_string(),
                details: status.details().to_vec().into(),
            },
        }
    }
}

fn interruption_error(reason: Interruption) -> InvokeError {
    match reason {
        Interruption::DeadlineExceeded => InvokeError::DeadlineExceeded,
        Interruption::Cancelled => InvokeError::Cancelled,
        Interruption::RequestRejected(err) => InvokeError::Codec(err),
    }
}

/// Per-call settings.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
    /// Deadline for the whole call, also announced to the server as `grpc-timeout`.
    pub timeout: Option<Duration>,
    pub json: JsonOptions,
    /// Cancelling this token tears the call down.
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_json(mut self, json: JsonOptions) -> Self {
        self.json = json;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// The outcome of [`Invoker::invoke`].
#[derive(Debug)]
pub enum DynamicResponse {
    /// The single response of a Unary or Client Streaming call.
    Unary(Value),
    /// The responses of a Server Streaming or Bidirectional call.
    Streaming(ResponseStream),
}

/// Decoded responses of one call, in the order the server sent them.
///
/// The stream ends after the server closes the call or after the first error. It cannot be
/// restarted.
pub struct ResponseStream {
    inner: BoxStream<'static, Result<Value, InvokeError>>,
    control: CallControl,
}

impl ResponseStream {
    fn new(
        responses: Streaming<Bytes>,
        output: MessageDescriptor,
        json: JsonOptions,
        control: CallControl,
    ) -> Self {
        let inner = receive_loop(responses, output, json, control.clone());
        Self { inner, control }
    }

    pub fn state(&self) -> CallState {
        self.control.state()
    }

    /// Cancels the call. The next poll yields [`InvokeError::Cancelled`].
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Drains the stream, requiring exactly one message.
    async fn single(mut self) -> Result<Value, InvokeError> {
        let mut first = None;
        let mut received = 0;

        while let Some(item) = self.inner.next().await {
            let value = item?;
            received += 1;
            first.get_or_insert(value);
        }

        match first {
            Some(value) if received == 1 => {
                self.control.transition(CallState::Completed);
                Ok(value)
            }
            _ => {
                self.control.transition(CallState::Failed);
                Err(InvokeError::UnexpectedResponseCount { received })
            }
        }
    }
}

impl Stream for ResponseStream {
    type Item = Result<Value, InvokeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(None) = next {
            self.control.transition(CallState::Completed);
        }
        next
    }
}

impl Drop for ResponseStream {
    // Releases the send loop of an abandoned call.
    fn drop(&mut self) {
        self.control.token().cancel();
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("state", &self.control.state())
            .finish_non_exhaustive()
    }
}

/// Executes calls against any method described at runtime.
#[derive(Debug, Clone)]
pub struct Invoker<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> Invoker<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Limits the size of a single encoded message, in both directions.
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.client = self
            .client
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);
        self
    }

    /// Runs `method` with the call shape picked from its streaming flags.
    ///
    /// Client Streaming and Bidirectional methods take a JSON array, one element per request.
    pub async fn invoke(
        &mut self,
        method: &MethodDescriptor,
        body: Value,
        options: CallOptions,
    ) -> Result<DynamicResponse, InvokeError> {
        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => self
                .unary(method, body, options)
                .await
                .map(DynamicResponse::Unary),
            (false, true) => self
                .server_streaming(method, body, options)
                .await
                .map(DynamicResponse::Streaming),
            (true, false) => {
                let requests = json_array_to_stream(body)?;
                self.client_streaming(method, requests, options)
                    .await
                    .map(DynamicResponse::Unary)
            }
            (true, true) => {
                let requests = json_array_to_stream(body)?;
                self.bidirectional(method, requests, options)
                    .await
                    .map(DynamicResponse::Streaming)
            }
        }
    }

    /// Single request, exactly one response.
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        body: Value,
        options: CallOptions,
    ) -> Result<Value, InvokeError> {
        self.server_streaming(method, body, options)
            .await?
            .single()
            .await
    }

    /// Single request, lazily decoded stream of responses.
    pub async fn server_streaming(
        &mut self,
        method: &MethodDescriptor,
        body: Value,
        options: CallOptions,
    ) -> Result<ResponseStream, InvokeError> {
        let message = from_json_value(method.input(), body, &options.json)?;
        let frame = Bytes::from(to_wire(&message));

        let control = CallControl::new(options.cancellation.as_ref(), options.timeout);
        let requests = tokio_stream::once(frame);

        let responses = self.start(method, requests, &options, &control).await;
        let responses = settle(&control, responses)?;

        Ok(ResponseStream::new(
            responses,
            method.output(),
            options.json,
            control,
        ))
    }

    /// Stream of requests, exactly one response.
    pub async fn client_streaming(
        &mut self,
        method: &MethodDescriptor,
        requests: impl Stream<Item = Value> + Send + 'static,
        options: CallOptions,
    ) -> Result<Value, InvokeError> {
        let responses = self.bidirectional(method, requests, options).await?;
        let control = responses.control.clone();

        let value = responses.single().await?;

        // The server may answer before reading every request.
        match control.reason() {
            Some(Interruption::RequestRejected(err)) => Err(InvokeError::Codec(err)),
            _ => Ok(value),
        }
    }

    /// Stream of requests, stream of responses.
    ///
    /// Requests are encoded and sent by a spawned task while the caller drives the returned
    /// stream. The two halves only share the channel and the call's cancellation signal.
    pub async fn bidirectional(
        &mut self,
        method: &MethodDescriptor,
        requests: impl Stream<Item = Value> + Send + 'static,
        options: CallOptions,
    ) -> Result<ResponseStream, InvokeError> {
        let control = CallControl::new(options.cancellation.as_ref(), options.timeout);
        let frames = spawn_send_loop(requests, method.input(), options.json, control.clone());

        let responses = self.start(method, frames, &options, &control).await;
        let responses = settle(&control, responses)?;

        Ok(ResponseStream::new(
            responses,
            method.output(),
            options.json,
            control,
        ))
    }

    /// Opens the HTTP/2 stream and waits for the response headers.
    async fn start(
        &mut self,
        method: &MethodDescriptor,
        frames: impl Stream<Item = Bytes> + Send + 'static,
        options: &CallOptions,
        control: &CallControl,
    ) -> Result<Streaming<Bytes>, InvokeError> {
        let mut request = tonic::Request::new(frames);
        *request.metadata_mut() = metadata_map(&options.headers)?;
        if let Some(timeout) = options.timeout {
            request.set_timeout(timeout);
        }

        control
            .guard(self.client.ready())
            .await
            .map_err(interruption_error)?
            .map_err(|e| InvokeError::ClientNotReady(e.into()))?;

        debug!(method = method.full_name(), "starting call");
        control.transition(CallState::Sending);

        let response = control
            .guard(self.client.streaming(request, http_path(method), WireCodec))
            .await
            .map_err(interruption_error)??;

        control.transition(CallState::Receiving);
        Ok(response.into_inner())
    }
}

/// Records the terminal state of a call that failed.
fn settle<T>(control: &CallControl, result: Result<T, InvokeError>) -> Result<T, InvokeError> {
    if let Err(err) = &result {
        match err {
            InvokeError::Cancelled => control.transition(CallState::Cancelled),
            _ => control.transition(CallState::Failed),
        }
    }
    result
}

fn receive_loop(
    responses: Streaming<Bytes>,
    output: MessageDescriptor,
    json: JsonOptions,
    control: CallControl,
) -> BoxStream<'static, Result<Value, InvokeError>> {
    futures_util::stream::unfold(Some(responses), move |responses| {
        let output = output.clone();
        let control = control.clone();

        async move {
            let mut responses = responses?;

            let item = match control.guard(responses.message()).await {
                Err(reason) => Err(interruption_error(reason)),
                Ok(Err(status)) => Err(InvokeError::from(status)),
                Ok(Ok(None)) => return None,
                Ok(Ok(Some(frame))) => {
                    trace!(len = frame.len(), "received frame");
                    decode(output, &frame, &json)
                }
            };

            match item {
                Ok(value) => Some((Ok(value), Some(responses))),
                Err(err) => {
                    warn!(%err, "response stream ended with an error");
                    let err = settle(&control, Err(err));
                    Some((err, None))
                }
            }
        }
    })
    .boxed()
}

fn decode(
    output: MessageDescriptor,
    frame: &[u8],
    json: &JsonOptions,
) -> Result<Value, InvokeError> {
    let message = from_wire(output, frame)?;
    Ok(to_json_value(&message, json)?)
}

/// Encodes and forwards requests in order until the caller's stream ends or the call is
/// interrupted. An encoding failure interrupts the whole call.
fn spawn_send_loop(
    requests: impl Stream<Item = Value> + Send + 'static,
    input: MessageDescriptor,
    json: JsonOptions,
    control: CallControl,
) -> ReceiverStream<Bytes> {
    let (tx, rx) = mpsc::channel(SEND_BUFFER);

    tokio::spawn(async move {
        let mut requests = std::pin::pin!(requests);

        loop {
            let value = match control.guard(requests.next()).await {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(_) => return,
            };

            let frame = match from_json_value(input.clone(), value, &json) {
                Ok(message) => Bytes::from(to_wire(&message)),
                Err(err) => {
                    warn!(%err, "request rejected, aborting call");
                    control.interrupt(Interruption::RequestRejected(err));
                    return;
                }
            };

            trace!(len = frame.len(), "sending frame");
            if !matches!(control.guard(tx.send(frame)).await, Ok(Ok(()))) {
                return;
            }
        }

        debug!("request stream exhausted");
    });

    ReceiverStream::new(rx)
}

fn json_array_to_stream(
    json: Value,
) -> Result<impl Stream<Item = Value> + Send + 'static, InvokeError> {
    match json {
        Value::Array(items) => Ok(tokio_stream::iter(items)),
        _ => Err(InvokeError::NotAStreamingRequest),
    }
}

fn http_path(method: &MethodDescriptor) -> http::uri::PathAndQuery {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).expect("valid gRPC path")
}
