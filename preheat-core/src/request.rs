//! # Request Descriptors
//!
//! Warmup requests are configured as compact strings:
//!
//! * HTTP: `<method>:<path>[:<body>]`, e.g. `post:/search:{"q": "{$random|a,b}"}`.
//! * gRPC: `<package.Service>/<Method>[:<message>]`, e.g. `echo.EchoService/UnaryEcho:{"message": "hi"}`.
//!
//! Placeholders in paths, bodies and messages are expanded through [`crate::template`] while
//! parsing, so every parse yields freshly resolved values.
use crate::template::interpolate;
use std::{fmt, str::FromStr};

const SEPARATOR: char = ':';

/// Errors produced when a descriptor string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidDescriptor {
    #[error("Invalid request '{0}', expected format <http-method>:<path>[:body]")]
    MissingPath(String),

    #[error("Invalid request '{descriptor}', method '{method}' is not supported")]
    UnsupportedMethod { descriptor: String, method: String },

    #[error("Invalid request '{0}', expected format <package.Service>/<Method>[:message]")]
    InvalidServiceMethod(String),
}

/// The HTTP verbs a warmup request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Connect,
    Options,
    Trace,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Connect,
        Method::Options,
        Method::Trace,
    ];

    /// The upper-case wire name of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or(upper)
    }
}

/// An HTTP warmup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// The request path, placeholders already resolved.
    pub path: String,
    /// `None` when the descriptor had no body segment, which is not the same as an empty body.
    pub body: Option<String>,
}

impl Request {
    /// Parses a `<method>:<path>[:<body>]` descriptor.
    ///
    /// Only the first two `:` split the descriptor, so bodies may contain colons.
    pub fn parse(descriptor: &str) -> Result<Self, InvalidDescriptor> {
        let mut parts = descriptor.splitn(3, SEPARATOR);

        let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
            return Err(InvalidDescriptor::MissingPath(descriptor.to_string()));
        };

        let method = method
            .parse::<Method>()
            .map_err(|method| InvalidDescriptor::UnsupportedMethod {
                descriptor: descriptor.to_string(),
                method,
            })?;

        Ok(Self {
            method,
            path: interpolate(path),
            body: parts.next().map(interpolate),
        })
    }
}

impl FromStr for Request {
    type Err = InvalidDescriptor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A gRPC warmup call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcCall {
    /// Fully qualified method name (`package.Service/Method`).
    pub method: String,
    /// JSON message(s). An empty string means "no payload".
    pub message: String,
    /// Metadata in `key: value` form.
    pub headers: Vec<String>,
}

impl GrpcCall {
    pub fn new(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            message: message.into(),
            headers: Vec::new(),
        }
    }

    /// Parses a `<package.Service>/<Method>[:<message>]` descriptor.
    ///
    /// The message is split off at the first `:` and interpolated.
    pub fn parse(descriptor: &str) -> Result<Self, InvalidDescriptor> {
        let (method, message) = descriptor
            .split_once(SEPARATOR)
            .unwrap_or((descriptor, ""));

        let valid = method
            .split_once('/')
            .is_some_and(|(service, name)| {
                !service.trim().is_empty() && !name.trim().is_empty() && !name.contains('/')
            });

        if !valid {
            return Err(InvalidDescriptor::InvalidServiceMethod(
                descriptor.to_string(),
            ));
        }

        Ok(Self::new(method.trim(), interpolate(message)))
    }

    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }
}

impl FromStr for GrpcCall {
    type Err = InvalidDescriptor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
