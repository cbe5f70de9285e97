//! # Warmup Responses
//!
//! Every dispatched warmup call, regardless of protocol, is reported as a [`Response`].
//! The business payload of the call is always discarded.
use crate::client::{ConnectionError, InvocationError};
use std::{fmt, sync::Arc, time::Duration};

/// Identifies which protocol client produced a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Grpc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a warmup call did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The client could not connect. Shared by every call made on the same client.
    #[error("Connection failed: {0}")]
    Connection(#[source] Arc<ConnectionError>),

    #[error("Call failed: {0}")]
    Invocation(#[from] InvocationError),

    #[error("The client has been closed")]
    Closed,
}

/// The outcome of a single warmup call.
#[derive(Debug)]
pub struct Response {
    /// Wall-clock time of the remote call; zero when no call was attempted.
    pub duration: Duration,
    pub error: Option<CallError>,
    pub protocol: Protocol,
}

impl Response {
    pub fn success(duration: Duration, protocol: Protocol) -> Self {
        Self {
            duration,
            error: None,
            protocol,
        }
    }

    pub fn failure(duration: Duration, error: CallError, protocol: Protocol) -> Self {
        Self {
            duration,
            error: Some(error),
            protocol,
        }
    }

    /// A failure reported before any call was attempted.
    pub fn not_sent(error: CallError, protocol: Protocol) -> Self {
        Self::failure(Duration::ZERO, error, protocol)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
