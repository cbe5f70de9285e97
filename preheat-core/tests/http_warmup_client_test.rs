use axum::{
    Router,
    http::{HeaderMap, StatusCode},
    routing::{any, get, post},
};
use preheat_core::client::http::HttpWarmupClient;
use preheat_core::client::{ConnectionError, InvocationError, ProtocolClient};
use preheat_core::{CallError, Protocol, Request};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;

/// Starts a backend on an ephemeral port and returns its address and hit counter.
async fn start_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/boom", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/echo",
            post(|body: String| async move {
                if body.is_empty() {
                    (StatusCode::BAD_REQUEST, String::new())
                } else {
                    (StatusCode::OK, body)
                }
            }),
        )
        .route(
            "/auth",
            get(|headers: HeaderMap| async move {
                let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());
                if authorization == Some("Bearer secret") {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::UNAUTHORIZED
                }
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                StatusCode::OK
            }),
        )
        .route(
            "/count",
            any(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::OK
                }
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    (addr, hits)
}

fn request(descriptor: &str) -> Request {
    Request::parse(descriptor).unwrap()
}

#[tokio::test]
async fn test_successful_get() {
    let (addr, _) = start_backend().await;
    let client = HttpWarmupClient::new(format!("http://{addr}"), false, 5);
    assert!(!client.is_connected());

    let response = client.dispatch(&request("GET:/health")).await;

    assert!(response.is_success(), "unexpected error: {:?}", response.error);
    assert_eq!(response.protocol, Protocol::Http);
    assert!(response.duration > Duration::ZERO);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_base_url_without_scheme() {
    let (addr, _) = start_backend().await;
    let client = HttpWarmupClient::new(addr.to_string(), false, 5);

    let response = client.dispatch(&request("HEAD:/health")).await;

    assert!(response.is_success(), "unexpected error: {:?}", response.error);
}

#[tokio::test]
async fn test_error_statuses_are_failures() {
    let (addr, _) = start_backend().await;
    let client = HttpWarmupClient::new(format!("http://{addr}"), false, 5);

    let response = client.dispatch(&request("GET:/boom")).await;
    assert!(matches!(
        response.error,
        Some(CallError::Invocation(InvocationError::HttpStatus(500)))
    ));

    let response = client.dispatch(&request("GET:/missing")).await;
    assert!(matches!(
        response.error,
        Some(CallError::Invocation(InvocationError::HttpStatus(404)))
    ));

    // The client stays usable after failed calls.
    let response = client.dispatch(&request("GET:/health")).await;
    assert!(response.is_success());
}

#[tokio::test]
async fn test_body_is_sent() {
    let (addr, _) = start_backend().await;
    let client = HttpWarmupClient::new(format!("http://{addr}"), false, 5);

    let response = client
        .dispatch(&request(r#"POST:/echo:{"day":"{$currentDate}"}"#))
        .await;
    assert!(response.is_success(), "unexpected error: {:?}", response.error);

    let response = client.dispatch(&request("POST:/echo")).await;
    assert!(matches!(
        response.error,
        Some(CallError::Invocation(InvocationError::HttpStatus(400)))
    ));
}

#[tokio::test]
async fn test_headers_are_sent_with_every_request() {
    let (addr, _) = start_backend().await;

    let client = HttpWarmupClient::new(format!("http://{addr}"), false, 5)
        .with_headers(vec!["Authorization: Bearer secret".to_string()]);
    for _ in 0..2 {
        assert!(client.dispatch(&request("GET:/auth")).await.is_success());
    }

    let anonymous = HttpWarmupClient::new(format!("http://{addr}"), false, 5);
    let response = anonymous.dispatch(&request("GET:/auth")).await;
    assert!(matches!(
        response.error,
        Some(CallError::Invocation(InvocationError::HttpStatus(401)))
    ));
}

#[tokio::test]
async fn test_every_method_reaches_the_server() {
    let (addr, hits) = start_backend().await;
    let client = HttpWarmupClient::new(format!("http://{addr}"), false, 5);

    let methods = ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];
    for method in methods {
        let response = client.dispatch(&request(&format!("{method}:/count"))).await;
        assert!(response.is_success(), "{method} failed: {:?}", response.error);
    }

    assert_eq!(hits.load(Ordering::SeqCst), methods.len());
}

#[tokio::test]
async fn test_call_timeout() {
    let (addr, _) = start_backend().await;
    let client = HttpWarmupClient::new(format!("http://{addr}"), false, 1);

    let response = client.dispatch(&request("GET:/slow")).await;

    assert!(matches!(
        response.error,
        Some(CallError::Invocation(InvocationError::DeadlineExceeded(timeout)))
            if timeout == Duration::from_secs(1)
    ));
}

#[tokio::test]
async fn test_unreachable_target_is_an_invocation_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpWarmupClient::new(format!("http://{addr}"), false, 5);
    let response = client.dispatch(&request("GET:/health")).await;

    assert!(matches!(
        response.error,
        Some(CallError::Invocation(InvocationError::Http(_)))
    ));
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_close_lifecycle() {
    let (addr, hits) = start_backend().await;
    let mut client = HttpWarmupClient::new(format!("http://{addr}"), false, 5);

    assert!(!client.close());

    let response = client.send_request(request("GET:/count")).await;
    assert!(response.is_success());

    assert!(client.close());
    assert!(!client.close());

    let response = client.send_request(request("GET:/count")).await;
    assert!(matches!(response.error, Some(CallError::Closed)));
    assert_eq!(response.duration, Duration::ZERO);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_header_never_sends() {
    let (addr, hits) = start_backend().await;
    let client = HttpWarmupClient::new(format!("http://{addr}"), false, 5)
        .with_headers(vec!["bad header: x".to_string()]);

    let response = client.dispatch(&request("GET:/count")).await;

    assert!(matches!(
        response.error,
        Some(CallError::Connection(ref err)) if matches!(**err, ConnectionError::InvalidHeader(_))
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
