//! Minimal HTTP client for fetching published key sets.
//!
//! This module provides a simple HTTP/1.1 GET client over
//! `std::net::TcpStream`. HTTPS (the normal case for a `jwks_uri`) needs the
//! "tls" feature, which brings in rustls with the webpki root store.
//!
//! # Design Notes
//!
//! - One request per call, no retries; checks report failures themselves
//! - Redirects are followed up to `HttpConfig::max_redirects`
//! - Checks reach the network only through the `KeySetFetcher` trait, so
//!   tests can substitute canned responses

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Errors raised while fetching a document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("request failed: {message}")]
    RequestFailed { message: String },

    #[error("request timeout: {message}")]
    Timeout { message: String },

    #[error("failed to parse response: {message}")]
    ParseError { message: String },

    #[error("too many redirects fetching {url}")]
    TooManyRedirects { url: String },

    #[error("HTTPS support not enabled. Build with: cargo build --features tls")]
    TlsNotEnabled,
}

/// HTTP response as recorded in a conversation or returned by a fetch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body
    #[serde(default)]
    pub body: String,
}

impl HttpResponse {
    /// Check if the response indicates success (2xx status)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// Get a header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Source of published documents (key sets) for checks that need one.
pub trait KeySetFetcher {
    fn fetch(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

/// Configuration for requests
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Redirects followed before giving up
    pub max_redirects: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            connect_timeout_ms: 10000,
            read_timeout_ms: 30000,
            max_redirects: 5,
        }
    }
}

/// Simple HTTP client
pub struct HttpClient {
    config: HttpConfig,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Self {
        HttpClient {
            config: HttpConfig::default(),
        }
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_config(config: HttpConfig) -> Self {
        HttpClient { config }
    }

    /// GET `url`, following redirects.
    pub fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let mut current = parse_url(url)?;

        for _ in 0..=self.config.max_redirects {
            let response = self.get_once(&current)?;
            if !response.is_redirect() {
                return Ok(response);
            }

            let location = response.header("location").ok_or_else(|| FetchError::ParseError {
                message: format!("redirect {} without Location header", response.status),
            })?;
            current = current.join(location).map_err(|e| FetchError::InvalidUrl {
                url: location.to_string(),
                message: e.to_string(),
            })?;
            debug!(target = %current, "following redirect");
        }

        Err(FetchError::TooManyRedirects {
            url: url.to_string(),
        })
    }

    fn get_once(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let host = url.host_str().ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            message: "missing host".to_string(),
        })?;
        let port = url.port_or_known_default().unwrap_or(80);
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        match url.scheme() {
            "https" => self.do_get_tls(host, port, &path),
            "http" => self.do_get_plain(host, port, &path),
            other => Err(FetchError::InvalidUrl {
                url: url.to_string(),
                message: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    fn connect(&self, host: &str, port: u16) -> Result<TcpStream, FetchError> {
        let stream = TcpStream::connect((host, port)).map_err(|e| FetchError::RequestFailed {
            message: format!("cannot connect to {}:{}: {}", host, port, e),
        })?;
        // Timeouts are best effort; a socket that refuses them still works.
        let _ = stream.set_read_timeout(Some(Duration::from_millis(self.config.read_timeout_ms)));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(self.config.connect_timeout_ms)));
        Ok(stream)
    }

    fn do_get_plain(&self, host: &str, port: u16, path: &str) -> Result<HttpResponse, FetchError> {
        let mut stream = self.connect(host, port)?;
        exchange(&mut stream, host, path)
    }

    #[cfg(feature = "tls")]
    fn do_get_tls(&self, host: &str, port: u16, path: &str) -> Result<HttpResponse, FetchError> {
        use std::sync::Arc;

        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name =
            rustls::pki_types::ServerName::try_from(host.to_string()).map_err(|e| FetchError::InvalidUrl {
                url: host.to_string(),
                message: e.to_string(),
            })?;
        let mut conn = rustls::ClientConnection::new(Arc::new(config), server_name).map_err(|e| {
            FetchError::RequestFailed {
                message: format!("TLS handshake with {} failed: {}", host, e),
            }
        })?;

        let mut tcp = self.connect(host, port)?;
        exchange(&mut rustls::Stream::new(&mut conn, &mut tcp), host, path)
    }

    #[cfg(not(feature = "tls"))]
    fn do_get_tls(&self, _host: &str, _port: u16, _path: &str) -> Result<HttpResponse, FetchError> {
        Err(FetchError::TlsNotEnabled)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySetFetcher for HttpClient {
    fn fetch(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.get(url)
    }
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn build_request(host: &str, path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Accept: application/json, application/jwk-set+json\r\n\
         Connection: close\r\n\r\n",
        path, host
    )
}

/// Send one GET over `stream` and read the response until the peer closes.
fn exchange<S: Read + Write>(stream: &mut S, host: &str, path: &str) -> Result<HttpResponse, FetchError> {
    stream
        .write_all(build_request(host, path).as_bytes())
        .map_err(|e| FetchError::RequestFailed {
            message: format!("sending request to {} failed: {}", host, e),
        })?;

    let mut raw = Vec::new();
    match stream.read_to_end(&mut raw) {
        Ok(_) => {}
        // TLS peers commonly close without close_notify
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
        Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
            if raw.is_empty() {
                return Err(FetchError::Timeout {
                    message: format!("no response from {}", host),
                });
            }
        }
        Err(e) => {
            return Err(FetchError::RequestFailed {
                message: format!("reading response from {} failed: {}", host, e),
            });
        }
    }
    parse_response(&raw)
}

fn malformed(message: impl Into<String>) -> FetchError {
    FetchError::ParseError {
        message: message.into(),
    }
}

/// Split `bytes` around the first occurrence of `delim`.
fn split_once_bytes<'a>(bytes: &'a [u8], delim: &[u8]) -> Option<(&'a [u8], &'a [u8])> {
    let at = bytes.windows(delim.len()).position(|w| w == delim)?;
    Some((&bytes[..at], &bytes[at + delim.len()..]))
}

fn parse_response(raw: &[u8]) -> Result<HttpResponse, FetchError> {
    let (head, body) =
        split_once_bytes(raw, b"\r\n\r\n").ok_or_else(|| malformed("response has no end of headers"))?;
    let head = String::from_utf8_lossy(head);

    let mut lines = head.split("\r\n");
    let status = parse_status_line(lines.next().unwrap_or_default())?;
    let headers: BTreeMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|te| te.eq_ignore_ascii_case("chunked"));
    // Chunk sizes count bytes, so the body is decoded only once assembled
    let body = if chunked {
        String::from_utf8_lossy(&decode_chunked(body)?).into_owned()
    } else {
        String::from_utf8_lossy(body).into_owned()
    };

    Ok(HttpResponse { status, headers, body })
}

/// Status code of an `HTTP/1.x NNN Reason` line.
fn parse_status_line(line: &str) -> Result<u16, FetchError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| malformed(format!("bad status code '{}'", code))),
        _ => Err(malformed(format!("bad status line '{}'", line))),
    }
}

fn decode_chunked(mut rest: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    while let Some((size_line, after)) = split_once_bytes(rest, b"\r\n") {
        let size_line = String::from_utf8_lossy(size_line);
        // Chunk extensions follow a ';'
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| malformed(format!("bad chunk size '{}'", size_hex)))?;
        if size == 0 {
            return Ok(body);
        }
        let Some(chunk) = after.get(..size) else {
            // Truncated final chunk
            body.extend_from_slice(after);
            return Ok(body);
        };
        body.extend_from_slice(chunk);
        rest = after[size..].strip_prefix(b"\r\n").unwrap_or(&after[size..]);
    }
    Err(malformed("chunked body without terminating chunk"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK").unwrap(), 200);
        assert_eq!(parse_status_line("HTTP/1.1 404 Not Found").unwrap(), 404);
        assert!(parse_status_line("garbage").is_err());
    }

    #[test]
    fn test_parse_response_lowercases_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"keys\":[]}";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.body, "{\"keys\":[]}");
    }

    #[test]
    fn test_parse_chunked_response() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n{\"a\"\r\n3\r\n:1}\r\n0\r\n\r\n";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.body, "{\"a\":1}");
    }

    #[test]
    fn test_chunk_boundary_inside_multibyte_character() {
        // "é" is two bytes split across the chunks
        let mut raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n9\r\n{\"kid\":\"".to_vec();
        raw.push(0xC3);
        raw.extend_from_slice(b"\r\n3\r\n");
        raw.push(0xA9);
        raw.extend_from_slice(b"\"}\r\n0\r\n\r\n");
        let response = parse_response(&raw).unwrap();
        assert_eq!(response.body, "{\"kid\":\"é\"}");
    }

    #[test]
    fn test_chunked_without_terminator() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\n{}{}";
        assert!(matches!(parse_response(raw), Err(FetchError::ParseError { .. })));
    }

    #[test]
    fn test_build_request() {
        let request = build_request("op.example.com", "/jwks?v=1");
        assert!(request.starts_with("GET /jwks?v=1 HTTP/1.1\r\n"));
        assert!(request.contains("Host: op.example.com"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let client = HttpClient::new();
        let err = client.get("ftp://op.example.com/jwks").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[test]
    fn test_redirect_statuses() {
        let response = HttpResponse {
            status: 302,
            ..HttpResponse::default()
        };
        assert!(response.is_redirect());
        assert!(!response.is_success());
    }
}
