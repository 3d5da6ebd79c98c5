//! The outbound HTTP boundary (§4.6 step 4, §5): a fresh `wreq` client per
//! attempt rather than a shared pool — a fresh outbound connection is safer
//! than a shared one across a failover, and isolates one candidate's
//! misbehaving keep-alive connection from the next.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::mpsc;
use wreq::Proxy;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamTransportError {
    #[error("connect error: {0}")]
    Connect(String),
    #[error("dns error: {0}")]
    Dns(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

/// Per-attempt timeout budget (§4.6 step 3): connect/write are folded into
/// `wreq`'s connect timeout, `read` bounds each chunk of a streaming body
/// rather than the stream as a whole, and `pool` is unused since every
/// attempt gets a fresh client with no connection pool to wait on.
#[derive(Debug, Clone, Copy)]
pub struct AttemptTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub total: Duration,
}

impl Default for AttemptTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(30),
            total: Duration::from_secs(600),
        }
    }
}

pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stream: bool,
    pub proxy: Option<String>,
    pub timeouts: AttemptTimeouts,
}

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Result<Bytes, UpstreamTransportError>>),
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamTransportError>;
}

/// Builds one `wreq::Client` per call. Cheap relative to the cost of a
/// misbehaving shared connection surviving a failover.
pub struct WreqUpstreamClient;

impl WreqUpstreamClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WreqUpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamTransportError> {
        let mut builder = wreq::Client::builder()
            .connect_timeout(req.timeouts.connect)
            .timeout(req.timeouts.total)
            .read_timeout(req.timeouts.read);

        if let Some(proxy) = req.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = Proxy::all(proxy).map_err(map_build_error)?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(map_build_error)?;

        let mut request = client.request(req.method, &req.url);
        for (name, value) in req.headers.iter() {
            request = request.header(name, value);
        }
        request = request.body(req.body);

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();
        let headers = response.headers().clone();

        if !req.stream {
            let body = response.bytes().await.map_err(map_send_error)?;
            return Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Bytes(body),
            });
        }

        let read_timeout = req.timeouts.read;
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(read_timeout, stream.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => {
                        let _ = tx.send(Err(UpstreamTransportError::Timeout)).await;
                        break;
                    }
                };
                match item {
                    Some(Ok(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        let _ = tx.send(Err(map_send_error(err))).await;
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Stream(rx),
        })
    }
}

fn map_build_error(err: wreq::Error) -> UpstreamTransportError {
    UpstreamTransportError::Connect(err.to_string())
}

fn map_send_error(err: wreq::Error) -> UpstreamTransportError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if err.is_timeout() {
        return UpstreamTransportError::Timeout;
    }
    if err.is_connect() {
        if lower.contains("dns") || lower.contains("resolve") {
            return UpstreamTransportError::Dns(message);
        }
        if lower.contains("tls") || lower.contains("ssl") {
            return UpstreamTransportError::Tls(message);
        }
        return UpstreamTransportError::Connect(message);
    }
    UpstreamTransportError::Network(message)
}
