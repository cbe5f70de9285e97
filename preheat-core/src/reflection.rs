//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! The warmup client queries the target for its own Protobuf schema when it connects, which
//! lets it call any method without pre-compiled descriptors.
pub mod client;
