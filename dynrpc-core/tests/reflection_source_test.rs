use dynrpc_core::descriptor::Descriptor;
use dynrpc_core::source::{ReflectionSource, SourceError};
use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use prost::Message;
use prost_types::FileDescriptorSet;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tonic_reflection::server::v1::{ServerReflection, ServerReflectionServer};


fn setup_source() -> ReflectionSource<ServerReflectionServer<impl ServerReflection>> {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .expect("Failed to setup Reflection Service");

    ReflectionSource::new(reflection_service)
}

#[tokio::test]
async fn test_reflection_lists_services() {
    let mut source = setup_source();

    let services = source.list_services().await.unwrap();

    assert!(services.contains(&"echo.EchoService".to_string()));
    assert!(services.contains(&"echo.Greeter".to_string()));
    assert!(services.contains(&"grpc.reflection.v1.ServerReflection".to_string()));
}

#[tokio::test]
async fn test_reflection_resolves_service_with_imports() {
    let mut source = setup_source();

    let desc = source
        .find_symbol("echo.EchoService")
        .await
        .unwrap()
        .expect("service should exist");

    let Descriptor::Service(service) = desc else {
        panic!("Expected a service descriptor, got {desc:?}");
    };

    assert!(service.methods().all(|m| m.input().name() == "EchoRequest"));
    assert!(service.methods().all(|m| m.output().name() == "EchoResponse"));

    let files: Vec<_> = source
        .registry()
        .all_files()
        .iter()
        .map(|f| f.name().to_string())
        .collect();

    let types = files.iter().position(|f| f == "types.proto").unwrap();
    let echo = files.iter().position(|f| f == "echo.proto").unwrap();
    assert!(types < echo, "imports must be registered first: {files:?}");
    assert!(source.registry().contains_file("google/protobuf/timestamp.proto"));
}

#[tokio::test]
async fn test_reflection_caches_resolved_symbols() {
    let mut source = setup_source();

    source.find_symbol("echo.Greeter").await.unwrap().unwrap();
    let after_first = source.round_trips();
    assert!(after_first >= 1);

    source.find_symbol("echo.Greeter").await.unwrap().unwrap();
    assert_eq!(source.round_trips(), after_first);

    // Defined in an import that was fetched along with the service.
    let desc = source.find_symbol("echo.Everything").await.unwrap().unwrap();
    assert!(matches!(desc, Descriptor::Message(_)));
    assert_eq!(source.round_trips(), after_first);
}

#[tokio::test]
async fn test_reflection_symbol_not_found() {
    let mut source = setup_source();

    let result = source.find_symbol("non.existent.Service").await.unwrap();
    assert!(result.is_none());

    // The source stays usable after a miss.
    let desc = source.find_symbol("echo.EchoService").await.unwrap();
    assert!(desc.is_some());
}

#[tokio::test]
async fn test_server_does_not_support_reflection() {
    // This server does NOT have the Reflection service registered.
    let server = EchoServiceServer::new(EchoServiceImpl);
    let mut source = ReflectionSource::new(server);

    let result = source.list_services().await;

    match result {
        Err(SourceError::DiscoveryFailed { code, .. }) => assert_eq!(code, Code::Unimplemented),
        other => panic!("Expected DiscoveryFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reflection_rejects_invalid_headers() {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .unwrap();

    let result = ReflectionSource::new(reflection_service)
        .with_headers(&[("bad header".to_string(), "value".to_string())]);

    assert!(matches!(result, Err(SourceError::InvalidMetadata(_))));
}

#[tokio::test]
async fn test_reflection_observes_cancellation() {
    let token = CancellationToken::new();
    token.cancel();

    let mut source = setup_source().with_cancellation(token);

    let result = source.find_symbol("echo.Greeter").await;
    assert!(matches!(result, Err(SourceError::Cancelled)));
    assert_eq!(source.round_trips(), 0);
}

#[tokio::test]
async fn test_missing_import_on_server_is_a_discovery_failure() {
    let mut set = FileDescriptorSet::decode(FILE_DESCRIPTOR_SET).unwrap();
    set.file.retain(|f| f.name() != "types.proto");
    let encoded = set.encode_to_vec();

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(&encoded)
        .build_v1()
        .unwrap();
    let mut source = ReflectionSource::new(reflection_service);

    // The service itself exists, only one of its imports cannot be served.
    let result = source.find_symbol("echo.Greeter").await;

    assert!(
        matches!(
            result,
            Err(SourceError::DiscoveryFailed {
                code: Code::NotFound,
                ..
            })
        ),
        "Expected DiscoveryFailed, got {result:?}"
    );
    assert!(!source.registry().contains_file("echo.proto"));
}
