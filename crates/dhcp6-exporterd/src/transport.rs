//! NX-API HTTP transport.
//!
//! [`HttpTransport::send_request`] posts a JSON-RPC batch from a worker of
//! its [`WorkerPool`] and hands the outcome to a completion callback as an
//! [`RpcReply`]. Failures never escape as errors across that boundary: the
//! callback always runs with the transport error, HTTP status and optional
//! RPC exception filled in. [`NxapiChannel`] wraps the callback API as an
//! awaitable [`CommandChannel`] for the switch client and heartbeat.

use crate::error::{ExporterError, Result};
use crate::pool::WorkerPool;
use async_trait::async_trait;
use nxos_types::rpc::{self, RpcBatch, RpcException, RpcResponse};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// NX-API endpoint path.
pub const ENDPOINT: &str = "/ins";

/// Content type NX-API expects for JSON-RPC bodies.
pub const JSON_RPC_CONTENT_TYPE: &str = "application/json-rpc";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of the HTTP exchange itself, independent of status and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseError {
    Success,
    Connection,
    BindIpAddress,
    Read,
    Write,
    ExceedRedirectCount,
    Canceled,
    TlsConnection,
    TlsLoadingCerts,
    TlsServerVerification,
    UnsupportedMultipartBoundaryChars,
    Compression,
    ConnectionTimeout,
    ProxyConnection,
    Unknown,
}

impl ResponseError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseError::Success => "success",
            ResponseError::Connection => "could not establish connection",
            ResponseError::BindIpAddress => "failed to bind IP address",
            ResponseError::Read => "failed to read connection",
            ResponseError::Write => "failed to write connection",
            ResponseError::ExceedRedirectCount => "maximum redirect count exceeded",
            ResponseError::Canceled => "connection handling canceled",
            ResponseError::TlsConnection => "TLS connection failed",
            ResponseError::TlsLoadingCerts => "TLS certificate loading failed",
            ResponseError::TlsServerVerification => "TLS server verification failed",
            ResponseError::UnsupportedMultipartBoundaryChars => {
                "unsupported HTTP multipart boundary characters"
            }
            ResponseError::Compression => "compression failed",
            ResponseError::ConnectionTimeout => "connection timeout",
            ResponseError::ProxyConnection => "proxy connection failed",
            ResponseError::Unknown => "unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == ResponseError::Success
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&reqwest::Error> for ResponseError {
    fn from(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ResponseError::ConnectionTimeout
        } else if err.is_connect() {
            ResponseError::Connection
        } else if err.is_redirect() {
            ResponseError::ExceedRedirectCount
        } else if err.is_body() || err.is_decode() {
            ResponseError::Read
        } else if err.is_request() {
            ResponseError::Write
        } else {
            ResponseError::Unknown
        }
    }
}

/// Everything a completion callback receives.
///
/// Consult `error` first, then `status`, then `exception`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    /// Empty unless the body decoded cleanly.
    pub results: Vec<RpcResponse>,
    pub error: ResponseError,
    /// HTTP status, 0 when no response was received.
    pub status: u16,
    pub exception: Option<RpcException>,
}

impl RpcReply {
    pub fn ok(status: u16, results: Vec<RpcResponse>) -> Self {
        Self {
            results,
            error: ResponseError::Success,
            status,
            exception: None,
        }
    }

    pub fn transport_failure(error: ResponseError) -> Self {
        Self {
            results: Vec::new(),
            error,
            status: 0,
            exception: None,
        }
    }

    pub fn rpc_failure(status: u16, exception: RpcException) -> Self {
        Self {
            results: Vec::new(),
            error: ResponseError::Success,
            status,
            exception: Some(exception),
        }
    }
}

/// Completion callback for [`HttpTransport::send_request`].
pub type ResponseCallback = Box<dyn FnOnce(RpcReply) + Send + 'static>;

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Client certificate material for HTTPS targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub certificate: PathBuf,
    pub keyfile: PathBuf,
}

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub multi_threaded: bool,
    pub pool_size: usize,
    pub auth: Option<BasicAuth>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            multi_threaded: true,
            pool_size: crate::pool::DEFAULT_POOL_SIZE,
            auth: None,
        }
    }
}

/// Asynchronous JSON-RPC over HTTP client backed by a worker pool.
pub struct HttpTransport {
    pool: WorkerPool,
    client: Client,
    auth: Option<BasicAuth>,
}

impl HttpTransport {
    pub fn new(name: &str, config: TransportConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            pool: WorkerPool::with_threading(name, config.multi_threaded, config.pool_size),
            client,
            auth: config.auth,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.pool.start()
    }

    pub fn stop(&self) {
        self.pool.stop()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Posts `batch` to `url` + `path` from a pool worker.
    ///
    /// Returns an error only if the request could not be queued at all:
    /// HTTPS targets are rejected until TLS is implemented, and a stopped
    /// pool accepts no work. Otherwise `callback` runs exactly once on a
    /// worker thread.
    pub fn send_request(
        &self,
        url: &Url,
        path: &str,
        tls: Option<&TlsInfo>,
        batch: &RpcBatch,
        timeout: Duration,
        callback: ResponseCallback,
    ) -> Result<()> {
        if url.scheme() == "https" {
            error!(connection = %url, has_tls = tls.is_some(), "TLS requests are not implemented");
            return Err(ExporterError::TlsNotImplemented);
        }

        let target = url
            .join(path)
            .map_err(|e| ExporterError::config("host", e.to_string()))?;
        let body = batch.encode().to_string();
        let client = self.client.clone();
        let auth = self.auth.clone();
        let connection = url.to_string();

        self.pool.spawn(async move {
            debug!(connection = %connection, request = %body, "Sending request");
            let reply = post(&client, target, auth.as_ref(), body, timeout, &connection).await;
            callback(reply);
        })
    }
}

async fn post(
    client: &Client,
    target: Url,
    auth: Option<&BasicAuth>,
    body: String,
    timeout: Duration,
    connection: &str,
) -> RpcReply {
    let mut request = client
        .post(target)
        .header(CONTENT_TYPE, JSON_RPC_CONTENT_TYPE)
        .timeout(timeout)
        .body(body);
    if let Some(auth) = auth {
        request = request.basic_auth(&auth.login, Some(&auth.password));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let kind = ResponseError::from(&e);
            error!(connection, error = %kind, detail = %e, "Communication with switch failed");
            return RpcReply::transport_failure(kind);
        }
    };

    let status = response.status().as_u16();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            let kind = ResponseError::from(&e);
            error!(connection, status, error = %kind, "Failed to read response body");
            return RpcReply {
                status,
                ..RpcReply::transport_failure(kind)
            };
        }
    };
    debug!(connection, status, response = %text, "Received response");

    match decode_body(&text) {
        Ok(results) => RpcReply::ok(status, results),
        Err(exception) => {
            error!(connection, status, error = %exception, "JSON-RPC validation failed");
            RpcReply::rpc_failure(status, exception)
        }
    }
}

fn decode_body(text: &str) -> std::result::Result<Vec<RpcResponse>, RpcException> {
    if text.is_empty() {
        return Err(RpcException::internal("no body found in the response"));
    }
    rpc::decode(text)
}

/// Awaitable command execution against one switch.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Name used to tag log lines, the switch URL.
    fn connection_name(&self) -> &str;

    /// Sends one batch and waits for its reply.
    async fn execute(&self, batch: RpcBatch) -> RpcReply;
}

/// [`CommandChannel`] over an [`HttpTransport`].
pub struct NxapiChannel {
    transport: Arc<HttpTransport>,
    url: Url,
    name: String,
    tls: Option<TlsInfo>,
    timeout: Duration,
}

impl NxapiChannel {
    pub fn new(
        transport: Arc<HttpTransport>,
        url: Url,
        tls: Option<TlsInfo>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            name: url.to_string(),
            url,
            tls,
            timeout,
        }
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }
}

#[async_trait]
impl CommandChannel for NxapiChannel {
    fn connection_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, batch: RpcBatch) -> RpcReply {
        let (tx, rx) = oneshot::channel();
        let queued = self.transport.send_request(
            &self.url,
            ENDPOINT,
            self.tls.as_ref(),
            &batch,
            self.timeout,
            Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        );

        match queued {
            Ok(()) => rx
                .await
                .unwrap_or_else(|_| RpcReply::transport_failure(ResponseError::Canceled)),
            Err(ExporterError::TlsNotImplemented) => {
                RpcReply::transport_failure(ResponseError::TlsConnection)
            }
            Err(e) => {
                debug!(connection = %self.name, error = %e, "Request not queued");
                RpcReply::transport_failure(ResponseError::Canceled)
            }
        }
    }
}

impl crate::pool::Spawn for HttpTransport {
    fn spawn_boxed(&self, fut: futures::future::BoxFuture<'static, ()>) -> bool {
        self.pool.spawn(fut).is_ok()
    }
}
