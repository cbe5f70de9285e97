//! # Protocol Clients
//!
//! A warmup target is reached through a [`ProtocolClient`]. Both implementations share the same
//! lifecycle:
//!
//! 1. **Lazy connect**: nothing happens on construction. The first call triggers the connect
//!    sequence, guarded so that it runs exactly once no matter how many calls race for it.
//!    Concurrent callers wait for that single attempt and all observe its outcome.
//! 2. **Sticky failure**: if the connect attempt fails, every call on that client reports the
//!    same [`ConnectionError`] without dialing again.
//! 3. **Uniform reporting**: every call yields a [`Response`] carrying its duration, its error
//!    (if any) and the protocol tag. Failed calls never poison the connection.
//! 4. **Close**: releases the connection. Closing a client that never connected is a no-op.
//!
//! Implementations:
//!
//! * [`grpc::GrpcWarmupClient`]: discovers the schema through server reflection and calls
//!   methods with JSON messages.
//! * [`http::HttpWarmupClient`]: sends [`crate::Request`]s over HTTP/1.1 or HTTP/2.
pub mod grpc;
pub mod http;

use crate::{
    BoxError,
    grpc::client::GrpcRequestError,
    reflection::client::ReflectionResolveError,
    response::{Protocol, Response},
};
use std::{future::Future, time::Duration};

/// Connect timeout applied to every protocol, independent of the per-call timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// The capability shared by every warmup protocol client.
pub trait ProtocolClient: Send + Sync {
    /// The description of a single call (an HTTP request, a gRPC method and message...).
    type Call: Send;

    fn protocol(&self) -> Protocol;

    /// Sends one warmup call, connecting first if this is the first call on the client.
    fn send_request(&self, call: Self::Call) -> impl Future<Output = Response> + Send;

    /// Releases the connection. Returns `true` if a live connection was released.
    fn close(&mut self) -> bool;
}

/// Failure of the once-guarded connect sequence.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid target '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to connect to '{target}': {source}")]
    Dial {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("Timed out after {timeout:?} connecting to '{target}'")]
    Timeout { target: String, timeout: Duration },

    #[error("Server reflection against '{target}' failed: {source}")]
    Reflection {
        target: String,
        #[source]
        source: ReflectionResolveError,
    },

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failure of an individual call on a connected client.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("Invalid method name '{0}', expected 'package.Service/Method'")]
    InvalidMethodName(String),

    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Invalid request message: {0}")]
    InvalidMessage(String),

    #[error("Method '{method}' takes a single request message, got {count}")]
    TooManyMessages { method: String, count: usize },

    #[error(transparent)]
    Request(#[from] GrpcRequestError),

    #[error("Server returned status '{}': {}", .0.code(), .0.message())]
    Status(#[from] tonic::Status),

    #[error("Call did not complete within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with HTTP status {0}")]
    HttpStatus(u16),
}

/// The per-call timeout configured in whole seconds; `0` disables it.
pub(crate) fn call_timeout(timeout_seconds: u64) -> Option<Duration> {
    (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds))
}
