//! # Reflection Client
//!
//! A client implementation for `grpc.reflection.v1`, falling back to `grpc.reflection.v1alpha`
//! for servers that only serve the older revision.
//!
//! At connect time the warmup client asks the target for every service it exposes and then for
//! the files defining them. Imports are inspected and missing files are requested recursively
//! until the complete schema tree is known, producing a single `DescriptorPool` that resolves
//! method names to their request and response descriptors.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::{BoxError, grpc::client::build_request};
use futures_util::{StreamExt, stream::BoxStream};
use http_body::Body as HttpBody;
use prost::Message;
use prost_reflect::{DescriptorError, DescriptorPool};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Code, Status, client::GrpcService};
use tonic_reflection::pb::{
    v1::{
        ServerReflectionResponse, server_reflection_client::ServerReflectionClient,
        server_reflection_response::MessageResponse,
    },
    v1alpha,
};

#[derive(Debug, thiserror::Error)]
pub enum ReflectionResolveError {
    #[error(
        "Failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    ServerStreamInitFailed(#[source] tonic::Status),

    #[error("The server stream returned an error status: '{0}'")]
    ServerStreamFailure(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("Invalid reflection request metadata: '{0}'")]
    InvalidMetadata(String),

    #[error("Server returned reflection error code {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("Failed to decode FileDescriptorProto: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Failed to build descriptor pool: {0}")]
    DescriptorError(#[from] DescriptorError),
}

impl ReflectionResolveError {
    /// Whether the server answered that the requested symbol or file does not exist.
    ///
    /// tonic reports it as a `NOT_FOUND` stream status, grpc-go as an error response
    /// carrying the same code.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ServerStreamFailure(status) => status.code() == Code::NotFound,
            Self::ServerError { code, .. } => *code == Code::NotFound as i32,
            _ => false,
        }
    }
}

/// The revision of the reflection protocol spoken with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionVersion {
    /// `grpc.reflection.v1`
    V1,
    /// `grpc.reflection.v1alpha`, still the only revision served by many servers.
    V1Alpha,
}

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
const EMPTY_HOST: &str = "";

/// A reflection request, independent of the protocol revision.
enum Query {
    ListServices,
    FileContainingSymbol(String),
    FileByFilename(String),
}

impl Query {
    fn into_v1(self) -> tonic_reflection::pb::v1::ServerReflectionRequest {
        use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;

        let message_request = match self {
            Query::ListServices => MessageRequest::ListServices(String::new()),
            Query::FileContainingSymbol(symbol) => MessageRequest::FileContainingSymbol(symbol),
            Query::FileByFilename(file) => MessageRequest::FileByFilename(file),
        };

        tonic_reflection::pb::v1::ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(message_request),
        }
    }

    fn into_v1alpha(self) -> v1alpha::ServerReflectionRequest {
        use v1alpha::server_reflection_request::MessageRequest;

        let message_request = match self {
            Query::ListServices => MessageRequest::ListServices(String::new()),
            Query::FileContainingSymbol(symbol) => MessageRequest::FileContainingSymbol(symbol),
            Query::FileByFilename(file) => MessageRequest::FileByFilename(file),
        };

        v1alpha::ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(message_request),
        }
    }
}

type ResponseStream = BoxStream<'static, Result<ServerReflectionResponse, Status>>;

/// A generic client for the gRPC Server Reflection Protocol.
///
/// `grpc.reflection.v1` is tried first; a server answering `UNIMPLEMENTED` is asked again
/// with `grpc.reflection.v1alpha`. The revision that worked is kept for later requests.
pub struct ReflectionClient<T = Channel> {
    service: T,
    headers: Vec<(String, String)>,
    version: Option<ReflectionVersion>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            service,
            headers: Vec::new(),
            version: None,
        }
    }

    /// Attaches metadata to every reflection request (e.g. authorization headers).
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Only speaks `version`, without falling back.
    pub fn with_version(mut self, version: ReflectionVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// The revision in use, once a request succeeded or one was pinned.
    pub fn version(&self) -> Option<ReflectionVersion> {
        self.version
    }

    /// Resolves the schema of every service exposed by the server into a single pool.
    pub async fn descriptor_pool(&mut self) -> Result<DescriptorPool, ReflectionResolveError> {
        let mut files = HashMap::new();

        for service in self.list_services().await? {
            let fd_set = match self.file_descriptor_set_by_symbol(&service).await {
                Ok(fd_set) => fd_set,
                Err(err) if err.is_not_found() => {
                    tracing::warn!(
                        %service,
                        "Listed service has no reflection descriptor, skipping"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };

            for file in fd_set.file {
                files.entry(file.name().to_string()).or_insert(file);
            }
        }

        let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
            file: files.into_values().collect(),
        })?;

        Ok(pool)
    }

    /// Asks the reflection service for the file containing the requested symbol (e.g., `my.package.MyService`),
    /// then recursively requests its missing dependencies until the full `FileDescriptorSet` is built.
    pub async fn file_descriptor_set_by_symbol(
        &mut self,
        symbol: &str,
    ) -> Result<FileDescriptorSet, ReflectionResolveError> {
        let (tx, mut response_stream) = self
            .open(|| Query::FileContainingSymbol(symbol.to_string()))
            .await?;

        let file_map = collect_descriptors(&mut response_stream, tx).await?;

        Ok(FileDescriptorSet {
            file: file_map.into_values().collect(),
        })
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionResolveError> {
        let (_tx, mut response_stream) = self.open(|| Query::ListServices).await?;

        let response = next_response(&mut response_stream).await?;

        match response.message_response {
            Some(MessageResponse::ListServicesResponse(resp)) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionResolveError::ServerError {
                code: e.error_code,
                message: e.error_message,
            }),
            Some(other) => Err(ReflectionResolveError::UnexpectedResponseType(format!(
                "{other:?}",
            ))),
            None => Err(ReflectionResolveError::UnexpectedResponseType(
                "Empty Message".into(),
            )),
        }
    }

    /// Opens a reflection stream whose first request is `first()`.
    ///
    /// Returns the sender for follow-up requests together with the response stream.
    async fn open(
        &mut self,
        first: impl Fn() -> Query,
    ) -> Result<(mpsc::Sender<Query>, ResponseStream), ReflectionResolveError> {
        let version = self.version.unwrap_or(ReflectionVersion::V1);

        match self.open_with(version, first()).await {
            Err(ReflectionResolveError::ServerStreamInitFailed(status))
                if status.code() == Code::Unimplemented
                    && self.version.is_none()
                    && version == ReflectionVersion::V1 =>
            {
                tracing::debug!("grpc.reflection.v1 is not served, trying v1alpha");
                let opened = self.open_with(ReflectionVersion::V1Alpha, first()).await?;
                self.version = Some(ReflectionVersion::V1Alpha);
                Ok(opened)
            }
            Ok(opened) => {
                self.version = Some(version);
                Ok(opened)
            }
            Err(err) => Err(err),
        }
    }

    async fn open_with(
        &self,
        version: ReflectionVersion,
        first: Query,
    ) -> Result<(mpsc::Sender<Query>, ResponseStream), ReflectionResolveError> {
        let (tx, rx) = mpsc::channel(100);

        tx.send(first)
            .await
            .map_err(|_| ReflectionResolveError::SendFailed)?;

        let requests = ReceiverStream::new(rx);

        let response_stream = match version {
            ReflectionVersion::V1 => {
                let request = build_request(requests.map(Query::into_v1), &self.headers)
                    .map_err(|e| ReflectionResolveError::InvalidMetadata(e.to_string()))?;

                ServerReflectionClient::new(self.service.clone())
                    .server_reflection_info(request)
                    .await
                    .map_err(ReflectionResolveError::ServerStreamInitFailed)?
                    .into_inner()
                    .boxed()
            }
            ReflectionVersion::V1Alpha => {
                let request = build_request(requests.map(Query::into_v1alpha), &self.headers)
                    .map_err(|e| ReflectionResolveError::InvalidMetadata(e.to_string()))?;

                v1alpha::server_reflection_client::ServerReflectionClient::new(
                    self.service.clone(),
                )
                .server_reflection_info(request)
                .await
                .map_err(ReflectionResolveError::ServerStreamInitFailed)?
                .into_inner()
                .map(|response| response.and_then(|r| from_v1alpha(&r)))
                .boxed()
            }
        };

        Ok((tx, response_stream))
    }
}

/// Both revisions share the same wire format, so a v1alpha response decodes as a v1 one.
fn from_v1alpha(
    response: &v1alpha::ServerReflectionResponse,
) -> Result<ServerReflectionResponse, Status> {
    ServerReflectionResponse::decode(response.encode_to_vec().as_slice())
        .map_err(|e| Status::internal(format!("Invalid v1alpha reflection response: {e}")))
}

async fn next_response(
    response_stream: &mut ResponseStream,
) -> Result<ServerReflectionResponse, ReflectionResolveError> {
    response_stream
        .next()
        .await
        .transpose()
        .map_err(ReflectionResolveError::ServerStreamFailure)?
        .ok_or(ReflectionResolveError::StreamClosed)
}

async fn collect_descriptors(
    response_stream: &mut ResponseStream,
    request_channel: mpsc::Sender<Query>,
) -> Result<HashMap<String, FileDescriptorProto>, ReflectionResolveError> {
    let mut inflight = 1;
    let mut collected_files = HashMap::new();
    let mut requested = HashSet::new();

    while inflight > 0 {
        let response = next_response(response_stream).await?;

        inflight -= 1;

        match response.message_response {
            Some(MessageResponse::FileDescriptorResponse(res)) => {
                for raw in res.file_descriptor_proto {
                    let fd = FileDescriptorProto::decode(raw.as_ref())?;

                    if let Some(name) = &fd.name
                        && !collected_files.contains_key(name)
                    {
                        inflight += request_dependencies(
                            &fd,
                            &collected_files,
                            &mut requested,
                            &request_channel,
                        )
                        .await?;
                        collected_files.insert(name.clone(), fd);
                    }
                }
            }
            Some(MessageResponse::ErrorResponse(e)) => {
                return Err(ReflectionResolveError::ServerError {
                    message: e.error_message,
                    code: e.error_code,
                });
            }
            Some(other) => {
                return Err(ReflectionResolveError::UnexpectedResponseType(format!(
                    "{other:?}"
                )));
            }
            None => {
                return Err(ReflectionResolveError::UnexpectedResponseType(
                    "Empty Message".into(),
                ));
            }
        }
    }

    Ok(collected_files)
}

async fn request_dependencies(
    fd: &FileDescriptorProto,
    collected_files: &HashMap<String, FileDescriptorProto>,
    requested: &mut HashSet<String>,
    tx: &mpsc::Sender<Query>,
) -> Result<usize, ReflectionResolveError> {
    let mut count = 0;

    for dep in &fd.dependency {
        if !collected_files.contains_key(dep) && requested.insert(dep.clone()) {
            tx.send(Query::FileByFilename(dep.clone()))
                .await
                .map_err(|_| ReflectionResolveError::SendFailed)?;
            count += 1;
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_recognised_in_both_reporting_styles() {
        let tonic_style = ReflectionResolveError::ServerStreamFailure(Status::not_found("x"));
        let grpc_go_style = ReflectionResolveError::ServerError {
            code: Code::NotFound as i32,
            message: "symbol not found: x".to_string(),
        };

        assert!(tonic_style.is_not_found());
        assert!(grpc_go_style.is_not_found());
    }

    #[test]
    fn other_failures_are_not_skipped() {
        let errors = [
            ReflectionResolveError::ServerStreamFailure(Status::internal("x")),
            ReflectionResolveError::ServerStreamInitFailed(Status::not_found("x")),
            ReflectionResolveError::ServerError {
                code: Code::Internal as i32,
                message: "boom".to_string(),
            },
            ReflectionResolveError::StreamClosed,
        ];

        for err in errors {
            assert!(!err.is_not_found(), "{err:?}");
        }
    }

    #[test]
    fn v1alpha_responses_read_as_v1() {
        let response = v1alpha::ServerReflectionResponse {
            valid_host: String::new(),
            original_request: None,
            message_response: Some(
                v1alpha::server_reflection_response::MessageResponse::ListServicesResponse(
                    v1alpha::ListServiceResponse {
                        service: vec![v1alpha::ServiceResponse {
                            name: "echo.EchoService".to_string(),
                        }],
                    },
                ),
            ),
        };

        let response = from_v1alpha(&response).unwrap();

        match response.message_response {
            Some(MessageResponse::ListServicesResponse(list)) => {
                assert_eq!(list.service.len(), 1);
                assert_eq!(list.service[0].name, "echo.EchoService");
            }
            other => panic!("Expected a service list, got {other:?}"),
        }
    }
}
