//! HTTP client for the registration exchange.
//!
//! Uses hyper with tokio for async HTTP/1.1 and rustls for HTTPS. One
//! connection per request; the provisioning pipeline makes a single short
//! POST, so pooling would never pay for itself.

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::{Method, Request, Uri};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// HTTP client errors
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Body read error: {0}")]
    Body(String),
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Overall request timeout, connect included
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// User-Agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: "PantherVPN/0.1".to_string(),
        }
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Collected response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Check if response was successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get body as string (lossy on invalid UTF-8)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parsed request target
struct Target {
    host: String,
    port: u16,
    https: bool,
    host_header: String,
    origin: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self, HttpError> {
        let uri: Uri = url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| HttpError::InvalidUrl(e.to_string()))?;

        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => {
                return Err(HttpError::InvalidUrl(format!(
                    "unsupported scheme: {}",
                    other.unwrap_or("none")
                )));
            }
        };

        let host = uri
            .host()
            .ok_or_else(|| HttpError::InvalidUrl("no host in URL".to_string()))?
            .to_string();
        let default_port = if https { 443 } else { 80 };
        let port = uri.port_u16().unwrap_or(default_port);

        // Host header carries the port only when it is non-default.
        let host_header = if port == default_port {
            host.clone()
        } else {
            format!("{host}:{port}")
        };

        let origin = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            host,
            port,
            https,
            host_header,
            origin,
        })
    }
}

/// Async HTTP client over hyper, rustls for HTTPS.
pub struct HttpClient {
    config: HttpClientConfig,
    tls: TlsConnector,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: HttpClientConfig) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            config,
            tls: TlsConnector::from(Arc::new(tls_config)),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(HttpClientConfig::default())
    }

    /// POST a JSON body, optionally with a bearer token. The whole exchange
    /// is bounded by the configured timeout.
    pub async fn post_json(
        &self,
        url: &str,
        body: Vec<u8>,
        bearer_token: Option<&str>,
    ) -> Result<HttpResponse, HttpError> {
        tokio::time::timeout(self.config.timeout, self.send(url, body, bearer_token))
            .await
            .map_err(|_| HttpError::Timeout)?
    }

    async fn send(
        &self,
        url: &str,
        body: Vec<u8>,
        bearer_token: Option<&str>,
    ) -> Result<HttpResponse, HttpError> {
        let target = Target::parse(url)?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(&target.origin)
            .header(HOST, &target.host_header)
            .header(USER_AGENT, &self.config.user_agent)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = bearer_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| HttpError::Http(e.to_string()))?;

        let addr = format!("{}:{}", target.host, target.port);
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            tokio::net::TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| HttpError::ConnectionFailed(format!("connect to {addr} timed out")))?
        .map_err(|e| HttpError::ConnectionFailed(e.to_string()))?;

        let response = if target.https {
            let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
                .map_err(|_| HttpError::Tls("invalid server name".to_string()))?;

            let tls_stream = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| HttpError::Tls(e.to_string()))?;

            exchange(tls_stream, request).await?
        } else {
            exchange(stream, request).await?
        };

        debug!(
            "POST {} -> {} ({} bytes)",
            url,
            response.status,
            response.body.len()
        );

        Ok(response)
    }
}

/// Drive one request over an established stream and collect the body.
async fn exchange<S>(stream: S, request: Request<Full<Bytes>>) -> Result<HttpResponse, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| HttpError::Http(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!("Connection error: {}", e);
        }
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| HttpError::Http(e.to_string()))?;

    let status = response.status().as_u16();
    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(|e| HttpError::Body(e.to_string()))?;

    Ok(HttpResponse {
        status,
        body: collected.to_bytes().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_https_defaults() {
        let t = Target::parse("https://api.panthervpn.app/wg-register").unwrap();
        assert_eq!(t.host, "api.panthervpn.app");
        assert_eq!(t.port, 443);
        assert!(t.https);
        assert_eq!(t.host_header, "api.panthervpn.app");
        assert_eq!(t.origin, "/wg-register");
    }

    #[test]
    fn test_target_explicit_port() {
        let t = Target::parse("http://localhost:8080/wg-register").unwrap();
        assert_eq!(t.port, 8080);
        assert!(!t.https);
        assert_eq!(t.host_header, "localhost:8080");
    }

    #[test]
    fn test_target_preserves_query() {
        let t = Target::parse("https://example.com/a/b?x=1").unwrap();
        assert_eq!(t.origin, "/a/b?x=1");
    }

    #[test]
    fn test_target_empty_path() {
        let t = Target::parse("https://example.com").unwrap();
        assert_eq!(t.origin, "/");
    }

    #[test]
    fn test_target_rejects_unknown_scheme() {
        assert!(matches!(
            Target::parse("ftp://example.com/x"),
            Err(HttpError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("PantherVPN/"));
    }

    #[test]
    fn test_response_helpers() {
        let ok = HttpResponse {
            status: 204,
            body: Vec::new(),
        };
        assert!(ok.is_success());

        let denied = HttpResponse {
            status: 403,
            body: b"device_limit_exceeded".to_vec(),
        };
        assert!(!denied.is_success());
        assert_eq!(denied.text(), "device_limit_exceeded");
    }
}
