//! # Preheat Core
//!
//! `preheat-core` is the library behind the `preheat` CLI. It issues synthetic warmup traffic
//! against a service instance before it is admitted to a load balancer, so that caches,
//! connection pools and TLS sessions are primed.
//!
//! ## Key Components
//!
//! * **[`template`]:** The placeholder interpolation engine (`{$currentDate|days=1}`,
//!   `{$currentTimestamp}`, `{$random|a,b}`, `{$range|min=1,max=9}`).
//! * **[`request`]:** Parsers for the compact request descriptors (`GET:/path[:body]` and
//!   `package.Service/Method[:message]`).
//! * **[`client`]:** The [`client::ProtocolClient`] capability and its two implementations,
//!   [`client::grpc::GrpcWarmupClient`] and [`client::http::HttpWarmupClient`]. Both connect
//!   lazily and exactly once, then report every call as a uniform [`Response`].
//!
//! ## Internal clients
//!
//! * **[`grpc::client::GrpcClient`]:** A dynamic gRPC client encoding `DynamicMessage`s.
//! * **[`reflection::client::ReflectionClient`]:** A gRPC Reflection client used to discover the
//!   schema of the target at connect time.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost-reflect` and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod client;
pub mod grpc;
pub mod reflection;
pub mod request;
pub mod response;
pub mod template;

pub use request::{GrpcCall, InvalidDescriptor, Method, Request};
pub use response::{CallError, Protocol, Response};
pub use template::interpolate;

// Re-exports
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
