//! # Dynamic gRPC Transport
//!
//! This module contains the low-level building blocks for performing gRPC calls against
//! services whose schema is only known at runtime.
//!
//! Unlike standard `tonic` clients which are strongly typed (e.g., `HelloRequest`),
//! the components here exchange `prost_reflect::DynamicMessage` values, encoding and decoding
//! them against the descriptors discovered through server reflection.
pub mod client;
pub mod codec;
