//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a schema-agnostic interface for
//! gRPC communication.
//!
//! The [`GrpcClient`] uses the [`super::codec::DynamicCodec`] for serialization. It receives
//! already validated `DynamicMessage` values together with the `MethodDescriptor` to call, and
//! builds the HTTP/2 path (`/package.Service/Method`) at runtime.
//!
//! Every call returns `Result<Result<T, Status>, GrpcRequestError>`: the outer error means the
//! request could not be sent at all, the inner `Status` means the server answered with an error.
use super::codec::DynamicCodec;
use crate::BoxError;
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::str::FromStr;
use tonic::{
    client::GrpcService,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid gRPC path '{0}'")]
    InvalidPath(String),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

/// A dynamic gRPC client over any `tonic` transport.
#[derive(Clone)]
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        payload: DynamicMessage,
        headers: &[(String, String)],
    ) -> Result<Result<DynamicMessage, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;
        let request = build_request(payload, headers)?;

        match self.client.unary(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Server Streaming gRPC call (Single Request -> Stream of Responses).
    pub async fn server_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload: DynamicMessage,
        headers: &[(String, String)],
    ) -> Result<
        Result<impl Stream<Item = Result<DynamicMessage, tonic::Status>>, tonic::Status>,
        GrpcRequestError,
    > {
        self.ready().await?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;
        let request = build_request(payload, headers)?;

        match self.client.server_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Client Streaming gRPC call (Stream of Requests -> Single Response).
    pub async fn client_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload_stream: impl Stream<Item = DynamicMessage> + Send + 'static,
        headers: &[(String, String)],
    ) -> Result<Result<DynamicMessage, tonic::Status>, GrpcRequestError> {
        self.ready().await?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;
        let request = build_request(payload_stream, headers)?;

        match self.client.client_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Bidirectional Streaming gRPC call (Stream of Requests -> Stream of Responses).
    pub async fn bidirectional_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload_stream: impl Stream<Item = DynamicMessage> + Send + 'static,
        headers: &[(String, String)],
    ) -> Result<
        Result<impl Stream<Item = Result<DynamicMessage, tonic::Status>>, tonic::Status>,
        GrpcRequestError,
    > {
        self.ready().await?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;
        let request = build_request(payload_stream, headers)?;

        match self.client.streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }
}

/// Splits `key: value` header strings into metadata pairs.
///
/// Keys are trimmed and lower-cased; a header without `:` gets an empty value.
pub fn parse_headers(headers: &[String]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|header| {
            let (key, value) = header.split_once(':').unwrap_or((header.as_str(), ""));
            (key.trim().to_ascii_lowercase(), value.trim().to_string())
        })
        .collect()
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).map_err(|_| GrpcRequestError::InvalidPath(path))
}

pub(crate) fn build_request<T>(
    payload: T,
    headers: &[(String, String)],
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    for (k, v) in headers {
        let key =
            MetadataKey::from_str(k).map_err(|source| GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            })?;
        let val = MetadataValue::from_str(v).map_err(|source| {
            GrpcRequestError::InvalidMetadataValue {
                key: k.clone(),
                source,
            }
        })?;
        request.metadata_mut().append(key, val);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_split_on_the_first_colon() {
        let headers = parse_headers(&[
            "Authorization: Bearer a:b".to_string(),
            "x-flag".to_string(),
            " x-trace :  42 ".to_string(),
        ]);

        assert_eq!(
            headers,
            vec![
                ("authorization".to_string(), "Bearer a:b".to_string()),
                ("x-flag".to_string(), String::new()),
                ("x-trace".to_string(), "42".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_metadata_key_is_rejected() {
        let result = build_request((), &[("bad key".to_string(), "v".to_string())]);
        assert!(matches!(
            result,
            Err(GrpcRequestError::InvalidMetadataKey { key, .. }) if key == "bad key"
        ));
    }

    #[test]
    fn repeated_metadata_keys_are_kept() {
        let request = build_request(
            (),
            &[
                ("x-tag".to_string(), "a".to_string()),
                ("x-tag".to_string(), "b".to_string()),
            ],
        )
        .unwrap();

        let values: Vec<_> = request
            .metadata()
            .get_all("x-tag")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["a", "b"]);
    }
}
