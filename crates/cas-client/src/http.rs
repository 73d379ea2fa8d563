//! HTTP seam used to reach the CAS server and peer nodes
//!
//! The core only depends on [`HttpFetcher`]. [`ReqwestFetcher`] is the
//! default implementation; tests substitute their own.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Methods used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

/// How the CAS server certificate is checked
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TlsPolicy {
    /// PEM file with the CA that signed the server certificate
    pub ca_cert: Option<PathBuf>,
    /// Verify the certificate chain at all
    pub validate: bool,
    /// Verify that the certificate matches the host name
    pub validate_hostname: bool,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            ca_cert: None,
            validate: true,
            validate_hostname: true,
        }
    }
}

/// One outbound HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method to use
    pub method: HttpMethod,
    /// Absolute target URL, query string included
    pub url: String,
    /// Extra headers, sent in order
    pub headers: Vec<(String, String)>,
    /// Request body, for POST only
    pub body: Option<String>,
    /// Certificate checks applied to HTTPS targets
    pub tls: TlsPolicy,
    /// Limit on establishing the connection
    pub connect_timeout: Option<Duration>,
    /// Limit on the whole exchange
    pub timeout: Option<Duration>,
    /// Report status codes >= 400 as [`TransportError::Status`]
    pub fail_on_error_status: bool,
}

impl HttpRequest {
    /// GET request without body
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// POST request carrying `body`
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        let mut request = Self::new(HttpMethod::Post, url);
        request.body = Some(body.into());
        request
    }

    fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            tls: TlsPolicy::default(),
            connect_timeout: None,
            timeout: None,
            fail_on_error_status: true,
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the certificate policy
    pub fn with_tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    /// Set connect and total timeouts
    pub fn with_timeouts(mut self, connect: Duration, total: Duration) -> Self {
        self.connect_timeout = Some(connect);
        self.timeout = Some(total);
        self
    }
}

/// Answer to an [`HttpRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as received
    pub headers: Vec<(String, String)>,
    /// Body decoded as text
    pub body: String,
}

impl HttpResponse {
    /// `200 OK` with the given body
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// First header named `name`, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Performs one HTTP exchange
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    tls: TlsPolicy,
    connect_timeout: Option<Duration>,
}

/// [`HttpFetcher`] backed by reqwest with rustls
///
/// One client is built per distinct TLS policy and connect timeout and then
/// reused, so connection pools survive across requests.
pub struct ReqwestFetcher {
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl ReqwestFetcher {
    /// Fetcher with an empty client cache
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, request: &HttpRequest) -> Result<reqwest::Client, TransportError> {
        let key = ClientKey {
            tls: request.tls.clone(),
            connect_timeout: request.connect_timeout,
        };
        if let Some(client) = self.clients.lock().get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(&key)?;
        self.clients.lock().insert(key, client.clone());
        Ok(client)
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client(key: &ClientKey) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder();
    if let Some(connect_timeout) = key.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }

    let tls = &key.tls;
    if !tls.validate {
        warn!("Certificate validation of the CAS server is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    } else {
        match &tls.ca_cert {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    TransportError::Tls(format!("cannot read CA certificate {}: {}", path.display(), e))
                })?;
                let certificate = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                builder = builder.add_root_certificate(certificate);
            }
            None => {
                warn!("Certificate validation requested without a CA certificate, using system roots");
            }
        }
        if !tls.validate_hostname {
            builder = builder.danger_accept_invalid_hostnames(true);
        }
    }

    builder
        .build()
        .map_err(|e| TransportError::Tls(e.to_string()))
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = self.client_for(&request)?;
        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        debug!("HTTP {:?} {}", request.method, request.url);
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if request.fail_on_error_status && status >= 400 {
            return Err(TransportError::Status(status));
        }
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let request = HttpRequest::post("https://node/logout", "rebroadcast=false")
            .header("x-node", "a")
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.body.as_deref(), Some("rebroadcast=false"));
        assert_eq!(request.headers, vec![("x-node".to_string(), "a".to_string())]);
        assert_eq!(request.connect_timeout, Some(Duration::from_secs(1)));
        assert_eq!(request.timeout, Some(Duration::from_secs(4)));
        assert!(request.fail_on_error_status);
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let response = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/xml".to_string())],
            body: String::new(),
        };
        assert_eq!(response.header("content-type"), Some("text/xml"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_missing_ca_file_is_a_tls_error() {
        let fetcher = ReqwestFetcher::new();
        let request = HttpRequest::get("https://cas.example.com/validate").with_tls(TlsPolicy {
            ca_cert: Some(PathBuf::from("/nonexistent/ca.pem")),
            validate: true,
            validate_hostname: true,
        });
        assert!(matches!(fetcher.client_for(&request), Err(TransportError::Tls(_))));
    }
}
