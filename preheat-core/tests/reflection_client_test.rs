use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use preheat_core::reflection::client::{
    ReflectionClient, ReflectionResolveError, ReflectionVersion,
};
use tonic::Code;
use tonic::service::Routes;


fn reflection_routes() -> Routes {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .expect("Failed to setup Reflection Service");

    Routes::new(reflection_service).add_service(EchoServiceServer::new(EchoServiceImpl))
}

#[tokio::test]
async fn test_list_services() {
    let mut client = ReflectionClient::new(reflection_routes());

    let services = client.list_services().await.unwrap();

    assert!(services.contains(&"echo.EchoService".to_string()));
    assert!(services.contains(&"grpc.reflection.v1.ServerReflection".to_string()));
}

#[tokio::test]
async fn test_descriptor_pool_merges_every_service() {
    let mut client = ReflectionClient::new(reflection_routes());

    let pool = client.descriptor_pool().await.unwrap();

    let echo = pool
        .get_service_by_name("echo.EchoService")
        .expect("echo service should be resolved");
    assert_eq!(echo.methods().count(), 4);
    assert!(echo.methods().all(|m| m.input().name() == "EchoRequest"));
    assert!(echo.methods().all(|m| m.output().name() == "EchoResponse"));

    assert!(
        pool.get_service_by_name("grpc.reflection.v1.ServerReflection")
            .is_some()
    );
}

#[tokio::test]
async fn test_descriptor_pool_with_headers() {
    let mut client = ReflectionClient::new(reflection_routes())
        .with_headers(vec![("authorization".to_string(), "Bearer t".to_string())]);

    let pool = client.descriptor_pool().await.unwrap();
    assert!(pool.get_service_by_name("echo.EchoService").is_some());
}

#[tokio::test]
async fn test_invalid_header_is_reported() {
    let mut client = ReflectionClient::new(reflection_routes())
        .with_headers(vec![("bad key".to_string(), "v".to_string())]);

    let result = client.list_services().await;

    assert!(matches!(
        result,
        Err(ReflectionResolveError::InvalidMetadata(_))
    ));
}

#[tokio::test]
async fn test_unknown_symbol_is_a_stream_failure() {
    let mut client = ReflectionClient::new(reflection_routes());

    let result = client.file_descriptor_set_by_symbol("echo.Ghost").await;

    assert!(matches!(
        result,
        Err(ReflectionResolveError::ServerStreamFailure(status)) if status.code() == Code::NotFound
    ));
}

#[tokio::test]
async fn test_server_without_reflection() {
    let mut client = ReflectionClient::new(EchoServiceServer::new(EchoServiceImpl));

    let result = client.list_services().await;

    assert!(matches!(
        result,
        Err(ReflectionResolveError::ServerStreamInitFailed(status))
            if status.code() == Code::Unimplemented
    ));
}

fn v1alpha_routes() -> Routes {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1alpha()
        .expect("Failed to setup Reflection Service");

    Routes::new(reflection_service).add_service(EchoServiceServer::new(EchoServiceImpl))
}

#[tokio::test]
async fn test_v1_is_preferred() {
    let mut client = ReflectionClient::new(reflection_routes());
    assert_eq!(client.version(), None);

    client.list_services().await.unwrap();

    assert_eq!(client.version(), Some(ReflectionVersion::V1));
}

#[tokio::test]
async fn test_falls_back_to_v1alpha() {
    let mut client = ReflectionClient::new(v1alpha_routes());

    let pool = client.descriptor_pool().await.unwrap();

    assert_eq!(client.version(), Some(ReflectionVersion::V1Alpha));
    let echo = pool
        .get_service_by_name("echo.EchoService")
        .expect("echo service should be resolved");
    assert_eq!(echo.methods().count(), 4);
}

#[tokio::test]
async fn test_v1alpha_symbol_lookup() {
    let mut client = ReflectionClient::new(v1alpha_routes());

    let fd_set = client
        .file_descriptor_set_by_symbol("echo.EchoService")
        .await
        .unwrap();
    assert!(fd_set.file.iter().any(|f| f.package() == "echo"));

    let result = client.file_descriptor_set_by_symbol("echo.Ghost").await;
    assert!(matches!(result, Err(ref err) if err.is_not_found()));
}

#[tokio::test]
async fn test_pinned_version_does_not_fall_back() {
    let mut client =
        ReflectionClient::new(v1alpha_routes()).with_version(ReflectionVersion::V1);

    let result = client.list_services().await;

    assert!(matches!(
        result,
        Err(ReflectionResolveError::ServerStreamInitFailed(status))
            if status.code() == Code::Unimplemented
    ));
}
