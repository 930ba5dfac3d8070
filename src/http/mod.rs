//! HTTP bridge: one cached HTTP/1.1 connection per client.
//!
//! The cache holds at most one connection, keyed by `(host, port, tls)`.
//! It is dropped whenever the key changes, a send fails, or the server
//! answers `Connection: close`. Retry policy lives a layer up in the
//! generic client; this module only reports failures.

#[cfg(test)]
pub(crate) mod mock;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::aws::url::Scheme;
use crate::aws::{Request, Response};

const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type HttpResult<T> = std::result::Result<T, HttpError>;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to resolve host: {0}")]
    Resolve(String),

    #[error("failed to connect: {0}")]
    Connect(#[from] std::io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("request failed: {0}")]
    Request(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("operation timed out")]
    Timeout,
}

/// One request/response round-trip. Implemented by [`HttpClient`] for the
/// wire and by a scripted mock in tests.
#[async_trait(?Send)]
pub trait Transport {
    async fn roundtrip(&mut self, req: &Request) -> HttpResult<Response>;
}

struct Connection {
    host: String,
    port: u16,
    tls: bool,
    sender: SendRequest<Full<Bytes>>,
}

/// HTTP/1.1 client holding a single cached keep-alive connection.
///
/// Not thread-safe: intended for serial use from one cooperative executor.
pub struct HttpClient {
    tls: tokio_native_tls::TlsConnector,
    resolve_timeout: Duration,
    connect_timeout: Duration,
    conn: Option<Connection>,
}

impl HttpClient {
    pub fn new() -> Self {
        let tls = native_tls::TlsConnector::new().expect("failed to build TLS connector");
        Self {
            tls: tokio_native_tls::TlsConnector::from(tls),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            conn: None,
        }
    }

    /// Ensure a usable connection for the given key, reusing the cached one
    /// when it matches and is still ready.
    async fn connect(&mut self, host: &str, port: u16, tls: bool) -> HttpResult<()> {
        if let Some(conn) = &mut self.conn {
            if conn.host == host && conn.port == port && conn.tls == tls {
                if conn.sender.ready().await.is_ok() {
                    return Ok(());
                }
                tracing::debug!(host, port, "cached connection no longer usable");
            }
            self.conn = None;
        }

        let addr = timeout(self.resolve_timeout, tokio::net::lookup_host((host, port)))
            .await
            .map_err(|_| HttpError::Timeout)??
            .next()
            .ok_or_else(|| HttpError::Resolve(host.to_string()))?;

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| HttpError::Timeout)??;
        stream.set_nodelay(true)?;

        let sender = if tls {
            let stream = self.tls.connect(host, stream).await?;
            let (sender, driver) = http1::handshake(TokioIo::new(stream)).await?;
            tokio::spawn(async move {
                if let Err(err) = driver.await {
                    tracing::debug!(error = %err, "connection closed");
                }
            });
            sender
        } else {
            let (sender, driver) = http1::handshake(TokioIo::new(stream)).await?;
            tokio::spawn(async move {
                if let Err(err) = driver.await {
                    tracing::debug!(error = %err, "connection closed");
                }
            });
            sender
        };

        tracing::debug!(host, port, tls, "connected");
        self.conn = Some(Connection {
            host: host.to_string(),
            port,
            tls,
            sender,
        });
        Ok(())
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Transport for HttpClient {
    async fn roundtrip(&mut self, req: &Request) -> HttpResult<Response> {
        let host = req.url.host().to_string();
        let port = req.url.port();
        let tls = req.url.scheme() == Scheme::Https;

        self.connect(&host, port, tls).await?;

        let query = req.url.query_string();
        let path = if query.is_empty() {
            req.url.canonical_path()
        } else {
            format!("{}?{}", req.url.canonical_path(), query)
        };

        let mut builder = hyper::Request::builder().method(req.method.clone()).uri(path);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let http_req = builder.body(Full::new(req.body.clone()))?;

        tracing::trace!(method = %req.method, url = %req.url, "sending request");

        let result = match &mut self.conn {
            Some(conn) => conn.sender.send_request(http_req).await,
            // connect() either cached a connection or returned an error.
            None => return Err(HttpError::Resolve(host)),
        };
        let http_resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(method = %req.method, url = %req.url, error = %err, "request failed");
                self.conn = None;
                return Err(HttpError::Request(err));
            }
        };

        let (parts, body) = http_resp.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                self.conn = None;
                return Err(HttpError::Request(err));
            }
        };

        let mut headers = BTreeMap::new();
        for (name, value) in &parts.headers {
            headers.insert(
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }

        let resp = Response {
            status: parts.status,
            headers,
            body,
        };
        tracing::trace!(status = %resp.status, "received response");

        if resp
            .header("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
        {
            self.conn = None;
        }

        Ok(resp)
    }
}
