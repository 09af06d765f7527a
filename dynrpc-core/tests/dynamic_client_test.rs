use dynrpc_core::client::{CallError, DynamicClient, DynamicRequest, DynamicResponse};
use dynrpc_core::descriptor::Descriptor;
use dynrpc_core::grpc::{CallOptions, InvokeError, Invoker};
use dynrpc_core::source::{ProtosetSource, ReflectionSource, SchemaSource};
use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET, GreeterServer};
use echo_service_impl::{EchoServiceImpl, GreeterImpl};
use futures_util::StreamExt;
use serde_json::json;
use std::time::Duration;
use tonic::service::Routes;


fn routes() -> Routes {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .unwrap();

    Routes::new(reflection_service)
        .add_service(EchoServiceServer::new(EchoServiceImpl))
        .add_service(GreeterServer::new(GreeterImpl))
}

fn reflection_client() -> DynamicClient<ReflectionSource<Routes>, Routes> {
    let service = routes();
    DynamicClient::new(ReflectionSource::new(service.clone()), Invoker::new(service))
}

fn protoset_client() -> DynamicClient<ProtosetSource, Routes> {
    let source = ProtosetSource::from_bytes([FILE_DESCRIPTOR_SET]).unwrap();
    DynamicClient::new(source, Invoker::new(routes()))
}

#[tokio::test]
async fn test_reflection_say_hello() {
    let mut client = reflection_client();

    let request = DynamicRequest::new("echo.Greeter", "SayHello", json!({ "name": "World" }));

    match client.call(request).await.unwrap() {
        DynamicResponse::Unary(value) => assert_eq!(value, json!({ "message": "Hello, World" })),
        other => panic!("Expected a unary response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_protoset_server_streaming() {
    let mut client = protoset_client();

    let request = DynamicRequest::new(
        "echo.Greeter",
        "SayHelloStream",
        json!({ "name": "Ada", "count": 3 }),
    );

    let DynamicResponse::Streaming(stream) = client.call(request).await.unwrap() else {
        panic!("Expected a streaming response");
    };

    let messages: Vec<_> = stream
        .map(|r| r.unwrap()["message"].as_str().unwrap().to_string())
        .collect()
        .await;

    assert_eq!(messages, ["Hello, Ada #0", "Hello, Ada #1", "Hello, Ada #2"]);
}

#[tokio::test]
async fn test_schema_source_client_streaming() {
    let service = routes();
    let source = SchemaSource::Reflection(ReflectionSource::new(service.clone()));
    let mut client = DynamicClient::new(source, Invoker::new(service));

    let request = DynamicRequest::new(
        "echo.EchoService",
        "ClientStreamingEcho",
        json!([{ "message": "A" }, { "message": "B" }, { "message": "C" }]),
    );

    match client.call(request).await.unwrap() {
        DynamicResponse::Unary(value) => assert_eq!(value, json!({ "message": "ABC" })),
        other => panic!("Expected a unary response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bidirectional_through_client() {
    let mut client = reflection_client();

    let request = DynamicRequest::new(
        "echo.EchoService",
        "BidirectionalEcho",
        json!([{ "message": "Ping" }, { "message": "Pong" }]),
    );

    let DynamicResponse::Streaming(stream) = client.call(request).await.unwrap() else {
        panic!("Expected a streaming response");
    };

    let replies: Vec<_> = stream.map(|r| r.unwrap()).collect().await;
    assert_eq!(
        replies,
        [json!({ "message": "echo: Ping" }), json!({ "message": "echo: Pong" })]
    );
}

#[tokio::test]
async fn test_deadline_through_client() {
    let mut client = protoset_client();

    let request = DynamicRequest::new(
        "echo.Greeter",
        "SlowHello",
        json!({ "name": "Slow", "delay_ms": 500 }),
    )
    .with_options(CallOptions::default().with_timeout(Duration::from_millis(50)));

    let result = client.call(request).await;
    assert!(matches!(
        result,
        Err(CallError::Invoke(InvokeError::DeadlineExceeded))
    ));
}

#[tokio::test]
async fn test_unknown_service_and_method() {
    let mut client = reflection_client();

    let request = DynamicRequest::new("echo.Nope", "SayHello", json!({}));
    assert!(matches!(
        client.call(request).await,
        Err(CallError::SymbolNotFound(name)) if name == "echo.Nope"
    ));

    let request = DynamicRequest::new("echo.Greeter", "Nope", json!({}));
    assert!(matches!(
        client.call(request).await,
        Err(CallError::MethodNotFound { method, .. }) if method == "Nope"
    ));
}

#[tokio::test]
async fn test_describe_symbols() {
    let mut client = reflection_client();

    let desc = client.describe("echo.EchoService").await.unwrap();
    assert!(matches!(desc, Descriptor::Service(ref s) if s.methods().count() == 4));

    let desc = client.describe("echo.Greeter.SayHello").await.unwrap();
    let method = desc.method_descriptor().expect("Expected a method");
    assert_eq!(method.input().full_name(), "echo.HelloRequest");

    let desc = client.describe("echo.Color").await.unwrap();
    assert!(matches!(desc, Descriptor::Enum(_)));

    let result = client.describe("echo.Nope").await;
    assert!(matches!(result, Err(CallError::SymbolNotFound(_))));
}

#[tokio::test]
async fn test_list_services_and_export() {
    let mut client = reflection_client();

    let services = client.list_services().await.unwrap();
    assert!(services.contains(&"echo.Greeter".to_string()));

    client.describe("echo.Greeter").await.unwrap();
    let exported = client.export_descriptor_set();

    let offline = ProtosetSource::from_bytes([exported]).unwrap();
    assert!(offline.find_symbol("echo.Greeter.SayHello").is_some());
    assert!(offline.find_symbol("echo.Everything").is_some());
}
