//! # gRPC Warmup Client
//!
//! [`GrpcWarmupClient`] calls arbitrary methods on a gRPC target using JSON messages.
//!
//! The connect sequence runs once, on the first call:
//!
//! 1. The [`Connector`] establishes the transport (for [`ChannelConnector`], a `tonic` channel
//!    dialed with TLS unless the target is insecure).
//! 2. Server reflection resolves every exposed service into a `DescriptorPool`, the descriptor
//!    source used to encode requests and decode replies.
//!
//! Both steps are bounded by [`Connector::dial_timeout`] ([`DIAL_TIMEOUT`] unless configured),
//! independently of the per-call timeout.
//!
//! Each call then resolves its method in the pool, validates the JSON message(s) against the
//! input descriptor and invokes the method. Replies are drained and discarded.
use super::{ConnectionError, DIAL_TIMEOUT, InvocationError, ProtocolClient, call_timeout};
use crate::{
    BoxError, GrpcCall,
    grpc::client::{GrpcClient, parse_headers},
    reflection::client::ReflectionClient,
    response::{CallError, Protocol, Response},
};
use futures_util::{Stream, StreamExt};
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::OnceCell, time::Instant};
use tonic::{
    client::GrpcService,
    transport::{Channel, ClientTlsConfig, Endpoint},
};

/// Establishes the transport of a [`GrpcWarmupClient`].
///
/// This is the seam between the connect-once lifecycle and the network: tests plug in
/// in-process services here.
pub trait Connector: Send + Sync {
    type Service: GrpcService<
            tonic::body::Body,
            Error: Into<BoxError>,
            Future: Send,
            ResponseBody: HttpBody<Data = tonic::codegen::Bytes, Error: Into<BoxError> + Send>
                              + Send
                              + 'static,
        > + Clone
        + Send
        + Sync
        + 'static;

    /// The address being connected to, used in logs and errors.
    fn target(&self) -> &str;

    /// Bounds the whole connect sequence: the dial and the server reflection that follows.
    fn dial_timeout(&self) -> Duration {
        DIAL_TIMEOUT
    }

    fn connect(&self) -> impl Future<Output = Result<Self::Service, ConnectionError>> + Send;
}

/// Dials a `tonic` [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    host: String,
    insecure: bool,
    dial_timeout: Duration,
}

impl ChannelConnector {
    /// `host` may be a bare `host:port` or a full URI. Bare hosts get `http://` when
    /// `insecure` is set and `https://` otherwise.
    pub fn new(host: impl Into<String>, insecure: bool) -> Self {
        Self {
            host: host.into(),
            insecure,
            dial_timeout: DIAL_TIMEOUT,
        }
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    fn uri(&self) -> String {
        if self.host.contains("://") {
            self.host.clone()
        } else if self.insecure {
            format!("http://{}", self.host)
        } else {
            format!("https://{}", self.host)
        }
    }

    fn endpoint(&self) -> Result<Endpoint, ConnectionError> {
        let invalid = |e: tonic::transport::Error| ConnectionError::InvalidTarget {
            target: self.host.clone(),
            source: e.into(),
        };

        let endpoint = Endpoint::from_shared(self.uri())
            .map_err(invalid)?
            .connect_timeout(self.dial_timeout);

        if self.insecure {
            tracing::info!("gRPC client: insecure");
            return Ok(endpoint);
        }

        endpoint
            .tls_config(ClientTlsConfig::new().with_native_roots())
            .map_err(invalid)
    }
}

impl Connector for ChannelConnector {
    type Service = Channel;

    fn target(&self) -> &str {
        &self.host
    }

    fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    async fn connect(&self) -> Result<Channel, ConnectionError> {
        let endpoint = self.endpoint()?;

        tracing::info!(host = %self.host, "gRPC client connecting");

        match tokio::time::timeout(self.dial_timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(e)) => Err(ConnectionError::Dial {
                target: self.host.clone(),
                source: e.into(),
            }),
            Err(_) => Err(ConnectionError::Timeout {
                target: self.host.clone(),
                timeout: self.dial_timeout,
            }),
        }
    }
}

/// A live connection and the schema discovered on it.
struct Connection<S> {
    grpc_client: GrpcClient<S>,
    pool: DescriptorPool,
}

struct PreparedCall {
    method: MethodDescriptor,
    messages: Vec<DynamicMessage>,
}

/// A gRPC protocol client that connects on first use. See the [module docs](self).
pub struct GrpcWarmupClient<C: Connector = ChannelConnector> {
    connector: C,
    timeout: Option<Duration>,
    connection: OnceCell<Result<Connection<C::Service>, Arc<ConnectionError>>>,
    closed: bool,
}

impl GrpcWarmupClient<ChannelConnector> {
    /// Creates a client for `host`. Nothing is dialed until the first call.
    ///
    /// # Arguments
    ///
    /// * `host` - The target address (`localhost:50051` or a full URI).
    /// * `insecure` - Skip transport security.
    /// * `timeout_seconds` - Per-call timeout; `0` disables it.
    pub fn new(host: impl Into<String>, insecure: bool, timeout_seconds: u64) -> Self {
        Self::with_connector(ChannelConnector::new(host, insecure), timeout_seconds)
    }
}

impl<C: Connector> GrpcWarmupClient<C> {
    pub fn with_connector(connector: C, timeout_seconds: u64) -> Self {
        Self {
            connector,
            timeout: call_timeout(timeout_seconds),
            connection: OnceCell::new(),
            closed: false,
        }
    }

    /// Whether the connect sequence has run and succeeded.
    pub fn is_connected(&self) -> bool {
        matches!(self.connection.get(), Some(Ok(_)))
    }

    /// Calls `service_method` (`package.Service/Method`) with a JSON `message`.
    ///
    /// An empty `message` means "no payload". `headers` are `key: value` strings attached as
    /// metadata; the headers of the first call are also used for server reflection.
    ///
    /// Failures are reported in the returned [`Response`]; the duration is zero when no call
    /// reached the server.
    pub async fn dispatch(
        &self,
        service_method: &str,
        message: &str,
        headers: &[String],
    ) -> Response {
        if self.closed {
            return Response::not_sent(CallError::Closed, Protocol::Grpc);
        }

        let metadata = parse_headers(headers);

        let connection = match self
            .connection
            .get_or_init(|| self.connect(&metadata))
            .await
        {
            Ok(connection) => connection,
            Err(err) => {
                tracing::warn!(error = %err, "gRPC client connect");
                return Response::not_sent(CallError::Connection(err.clone()), Protocol::Grpc);
            }
        };

        let call = match connection.prepare(service_method, message) {
            Ok(call) => call,
            Err(err) => {
                tracing::warn!(method = service_method, error = %err, "gRPC call not sent");
                return Response::not_sent(err.into(), Protocol::Grpc);
            }
        };

        let mut grpc_client = connection.grpc_client.clone();
        let start = Instant::now();

        let result = match self.timeout {
            Some(timeout) => {
                tokio::time::timeout(timeout, invoke(&mut grpc_client, call, &metadata))
                    .await
                    .unwrap_or(Err(InvocationError::DeadlineExceeded(timeout)))
            }
            None => invoke(&mut grpc_client, call, &metadata).await,
        };

        let duration = start.elapsed();

        match result {
            Ok(()) => Response::success(duration, Protocol::Grpc),
            Err(err) => {
                tracing::warn!(method = service_method, error = %err, "gRPC call failed");
                Response::failure(duration, err.into(), Protocol::Grpc)
            }
        }
    }

    async fn connect(
        &self,
        headers: &[(String, String)],
    ) -> Result<Connection<C::Service>, Arc<ConnectionError>> {
        let target = self.connector.target().to_string();

        let service = self.connector.connect().await?;

        let mut reflection =
            ReflectionClient::new(service.clone()).with_headers(headers.to_vec());

        let dial_timeout = self.connector.dial_timeout();
        let pool = tokio::time::timeout(dial_timeout, reflection.descriptor_pool())
            .await
            .map_err(|_| ConnectionError::Timeout {
                target: target.clone(),
                timeout: dial_timeout,
            })?
            .map_err(|source| ConnectionError::Reflection {
                target: target.clone(),
                source,
            })?;

        tracing::info!(
            host = %target,
            services = pool.services().len(),
            "gRPC client connected"
        );

        Ok(Connection {
            grpc_client: GrpcClient::new(service),
            pool,
        })
    }
}

impl<C: Connector> ProtocolClient for GrpcWarmupClient<C> {
    type Call = GrpcCall;

    fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }

    async fn send_request(&self, call: GrpcCall) -> Response {
        self.dispatch(&call.method, &call.message, &call.headers).await
    }

    /// Only a client that attempted to connect becomes closed; later calls on it fail with
    /// [`CallError::Closed`].
    fn close(&mut self) -> bool {
        if self.closed || !self.connection.initialized() {
            return false;
        }

        tracing::info!(host = %self.connector.target(), "Closing gRPC client connection");
        self.closed = true;
        matches!(self.connection.take(), Some(Ok(_)))
    }
}

impl<S> Connection<S> {
    fn prepare(
        &self,
        service_method: &str,
        message: &str,
    ) -> Result<PreparedCall, InvocationError> {
        let method = resolve_method(&self.pool, service_method)?;
        let messages = parse_messages(&method, message)?;
        Ok(PreparedCall { method, messages })
    }
}

/// Accepts `package.Service/Method`, `/package.Service/Method` and `package.Service.Method`.
fn resolve_method(
    pool: &DescriptorPool,
    service_method: &str,
) -> Result<MethodDescriptor, InvocationError> {
    let name = service_method.trim().trim_start_matches('/');

    let (service, method) = name
        .rsplit_once('/')
        .or_else(|| name.rsplit_once('.'))
        .filter(|(service, method)| !service.is_empty() && !method.is_empty())
        .ok_or_else(|| InvocationError::InvalidMethodName(service_method.to_string()))?;

    pool.get_service_by_name(service)
        .ok_or_else(|| InvocationError::ServiceNotFound(service.to_string()))?
        .methods()
        .find(|m| m.name() == method)
        .ok_or_else(|| InvocationError::MethodNotFound(name.to_string()))
}

/// Parses `message` as a sequence of concatenated JSON values, each validated against the
/// method input.
///
/// A blank message is one empty request for unary inputs and an empty stream for streaming
/// inputs. A single JSON array is flattened into a stream for streaming inputs.
fn parse_messages(
    method: &MethodDescriptor,
    message: &str,
) -> Result<Vec<DynamicMessage>, InvocationError> {
    let mut values = serde_json::Deserializer::from_str(message)
        .into_iter::<serde_json::Value>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| InvocationError::InvalidMessage(e.to_string()))?;

    if method.is_client_streaming() {
        if matches!(values.as_slice(), [serde_json::Value::Array(_)])
            && let Some(serde_json::Value::Array(items)) = values.pop()
        {
            values = items;
        }
    } else if values.len() > 1 {
        return Err(InvocationError::TooManyMessages {
            method: method.full_name().to_string(),
            count: values.len(),
        });
    } else if values.is_empty() {
        values.push(serde_json::Value::Object(Default::default()));
    }

    values
        .into_iter()
        .map(|value| {
            DynamicMessage::deserialize(method.input(), value)
                .map_err(|e| InvocationError::InvalidMessage(e.to_string()))
        })
        .collect()
}

async fn invoke<S>(
    client: &mut GrpcClient<S>,
    call: PreparedCall,
    headers: &[(String, String)],
) -> Result<(), InvocationError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let PreparedCall {
        method,
        mut messages,
    } = call;

    match (method.is_client_streaming(), method.is_server_streaming()) {
        (false, false) => {
            let payload = single_message(&method, &mut messages);
            let reply = client.unary(&method, payload, headers).await??;
            discard(&method, &reply);
        }
        (false, true) => {
            let payload = single_message(&method, &mut messages);
            let replies = client.server_streaming(&method, payload, headers).await??;
            drain(&method, replies).await?;
        }
        (true, false) => {
            let payloads = tokio_stream::iter(messages);
            let reply = client.client_streaming(&method, payloads, headers).await??;
            discard(&method, &reply);
        }
        (true, true) => {
            let payloads = tokio_stream::iter(messages);
            let replies = client
                .bidirectional_streaming(&method, payloads, headers)
                .await??;
            drain(&method, replies).await?;
        }
    }

    Ok(())
}

fn single_message(
    method: &MethodDescriptor,
    messages: &mut Vec<DynamicMessage>,
) -> DynamicMessage {
    messages
        .pop()
        .unwrap_or_else(|| DynamicMessage::new(method.input()))
}

async fn drain(
    method: &MethodDescriptor,
    replies: impl Stream<Item = Result<DynamicMessage, tonic::Status>>,
) -> Result<(), InvocationError> {
    let mut replies = std::pin::pin!(replies);
    while let Some(reply) = replies.next().await {
        discard(method, &reply?);
    }
    Ok(())
}

fn discard(method: &MethodDescriptor, reply: &DynamicMessage) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        let reply = serde_json::to_string(reply).unwrap_or_default();
        tracing::debug!(method = method.full_name(), %reply, "Discarding gRPC reply");
    }
}
