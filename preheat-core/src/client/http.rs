//! # HTTP Warmup Client
//!
//! [`HttpWarmupClient`] sends [`Request`]s to a base URL with `reqwest`.
//!
//! The underlying `reqwest::Client` (connection pool, default headers, timeouts and TLS
//! settings) is built exactly once, on the first call, mirroring the gRPC client lifecycle.
//! A response with a `4xx` or `5xx` status is reported as a failed call; the body is always
//! read to completion so the pooled connection can be reused.
use super::{ConnectionError, DIAL_TIMEOUT, InvocationError, ProtocolClient, call_timeout};
use crate::{
    Method, Request,
    response::{CallError, Protocol, Response},
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::{sync::Arc, time::Duration};
use tokio::{sync::OnceCell, time::Instant};

/// An HTTP protocol client that builds its connection pool on first use.
pub struct HttpWarmupClient {
    base_url: String,
    headers: Vec<String>,
    insecure: bool,
    timeout: Option<Duration>,
    client: OnceCell<Result<reqwest::Client, Arc<ConnectionError>>>,
    closed: bool,
}

impl HttpWarmupClient {
    /// Creates a client for `base_url`. Nothing is built until the first call.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Scheme, host and port (`http://localhost:8080`); `http://` is assumed
    ///   when the scheme is missing.
    /// * `insecure` - Accept invalid TLS certificates.
    /// * `timeout_seconds` - Per-call timeout; `0` disables it.
    pub fn new(base_url: impl Into<String>, insecure: bool, timeout_seconds: u64) -> Self {
        let base_url = base_url.into();
        let base_url = if base_url.contains("://") {
            base_url
        } else {
            format!("http://{base_url}")
        };

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            headers: Vec::new(),
            insecure,
            timeout: call_timeout(timeout_seconds),
            client: OnceCell::new(),
            closed: false,
        }
    }

    /// Headers (`key: value`) sent with every request.
    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.client.get(), Some(Ok(_)))
    }

    /// Sends `request` and reports its outcome.
    pub async fn dispatch(&self, request: &Request) -> Response {
        if self.closed {
            return Response::not_sent(CallError::Closed, Protocol::Http);
        }

        let client = match self.client.get_or_init(|| async { self.build() }).await {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(error = %err, "HTTP client connect");
                return Response::not_sent(CallError::Connection(err.clone()), Protocol::Http);
            }
        };

        let mut builder = client.request(to_reqwest(request.method), self.url(&request.path));
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();

        let result = send(builder).await.map_err(|err| match (err, self.timeout) {
            (InvocationError::Http(e), Some(timeout)) if e.is_timeout() => {
                InvocationError::DeadlineExceeded(timeout)
            }
            (err, _) => err,
        });

        let duration = start.elapsed();

        match result {
            Ok(()) => Response::success(duration, Protocol::Http),
            Err(err) => {
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    error = %err,
                    "HTTP call failed"
                );
                Response::failure(duration, err.into(), Protocol::Http)
            }
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build(&self) -> Result<reqwest::Client, Arc<ConnectionError>> {
        let mut headers = HeaderMap::new();
        for header in &self.headers {
            let (key, value) = header.split_once(':').unwrap_or((header.as_str(), ""));
            let invalid = || ConnectionError::InvalidHeader(header.clone());
            let key = HeaderName::from_bytes(key.trim().as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value.trim()).map_err(|_| invalid())?;
            headers.append(key, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(DIAL_TIMEOUT)
            .danger_accept_invalid_certs(self.insecure);

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(ConnectionError::HttpClient)?;
        tracing::info!(base_url = %self.base_url, "HTTP client ready");

        Ok(client)
    }
}

impl ProtocolClient for HttpWarmupClient {
    type Call = Request;

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn send_request(&self, call: Request) -> Response {
        self.dispatch(&call).await
    }

    fn close(&mut self) -> bool {
        if self.closed || !self.client.initialized() {
            return false;
        }

        tracing::info!(base_url = %self.base_url, "Closing HTTP client");
        self.closed = true;
        matches!(self.client.take(), Some(Ok(_)))
    }
}

async fn send(builder: reqwest::RequestBuilder) -> Result<(), InvocationError> {
    let response = builder.send().await?;
    let status = response.status();
    response.bytes().await?;

    if status.is_client_error() || status.is_server_error() {
        return Err(InvocationError::HttpStatus(status.as_u16()));
    }

    Ok(())
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Connect => reqwest::Method::CONNECT,
        Method::Options => reqwest::Method::OPTIONS,
        Method::Trace => reqwest::Method::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_base_and_path() {
        let client = HttpWarmupClient::new("localhost:8080/", false, 1);
        assert_eq!(client.url("/health"), "http://localhost:8080/health");
        assert_eq!(client.url("health"), "http://localhost:8080/health");

        let client = HttpWarmupClient::new("https://svc", false, 1);
        assert_eq!(client.url("/a?b=c"), "https://svc/a?b=c");
    }

    #[tokio::test]
    async fn invalid_header_is_a_sticky_connection_error() {
        let client = HttpWarmupClient::new("http://127.0.0.1:1", false, 1)
            .with_headers(vec!["bad header: x".to_string()]);
        let request = Request::parse("GET:/").unwrap();

        for _ in 0..2 {
            let response = client.dispatch(&request).await;
            assert_eq!(response.duration, Duration::ZERO);
            assert!(matches!(
                response.error,
                Some(CallError::Connection(ref err))
                    if matches!(**err, ConnectionError::InvalidHeader(_))
            ));
        }
        assert!(!client.is_connected());
    }
}
