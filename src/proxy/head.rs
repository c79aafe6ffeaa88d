//! Request head parsing
//!
//! Extracts `(method, host, port)` from the first bytes a client sends.
//! The raw bytes are retained verbatim: for plain HTTP they are replayed to
//! the origin as the opening bytes of the outbound stream.
//!
//! Parsing is deliberately shallow. The proxy only needs a destination;
//! everything else is forwarded opaquely, so there is no header map, no
//! chunked-body awareness, and no validation beyond what routing requires.

use bytes::Bytes;

use crate::error::RequestError;

/// Maximum request head size read from the client
pub const MAX_HEAD_SIZE: usize = 8192;

/// Parsed request head plus the raw bytes it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method (GET, POST, CONNECT, ...)
    pub method: String,
    /// Destination host
    pub host: String,
    /// Destination port
    pub port: u16,
    /// The bytes exactly as received
    raw: Bytes,
}

impl RequestHead {
    /// Parse the first bytes of a client request
    ///
    /// Rules:
    /// - The first line must tokenize as exactly `METHOD URL PROTOCOL`.
    /// - `CONNECT` targets are `host:port`.
    /// - Other methods use the `Host: ` header when present (port 80), and
    ///   fall back to the absolute-form URL otherwise (explicit port, or
    ///   443 for https and 80 for everything else).
    ///
    /// # Errors
    ///
    /// Returns `RequestError` when the head cannot yield a destination.
    pub fn parse(data: &[u8]) -> Result<Self, RequestError> {
        let text = String::from_utf8_lossy(data);

        let first_line = text.lines().next().unwrap_or("").trim();
        let tokens: Vec<&str> = first_line.split_whitespace().collect();
        let [method, url, _protocol] = tokens.as_slice() else {
            return Err(RequestError::MalformedRequestLine(first_line.to_string()));
        };

        let (host, port) = if *method == "CONNECT" {
            parse_connect_authority(url)?
        } else if let Some(host) = find_host_header(&text) {
            (host, 80)
        } else {
            parse_absolute_url(url)?
        };

        Ok(Self {
            method: (*method).to_string(),
            host,
            port,
            raw: Bytes::copy_from_slice(data),
        })
    }

    /// Whether this is a CONNECT tunnel request
    #[must_use]
    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }

    /// The request bytes exactly as received from the client
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl std::fmt::Display for RequestHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:{}", self.method, self.host, self.port)
    }
}

/// Parse a CONNECT target of the form `host:port`
fn parse_connect_authority(url: &str) -> Result<(String, u16), RequestError> {
    let Some((host, port)) = url.rsplit_once(':') else {
        return Err(RequestError::InvalidAuthority(url.to_string()));
    };
    if host.is_empty() {
        return Err(RequestError::InvalidAuthority(url.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| RequestError::InvalidPort(url.to_string()))?;
    Ok((host.to_string(), port))
}

/// Scan the raw head for a `Host: ` header
///
/// The match is case-sensitive on the canonical spelling; anything more
/// exotic falls through to the absolute-URL path.
fn find_host_header(text: &str) -> Option<String> {
    let start = text.find("Host: ")? + "Host: ".len();
    let rest = &text[start..];
    let value = match rest.find("\r\n") {
        Some(end) => &rest[..end],
        None => rest,
    };
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

/// Parse an absolute-form URL into host and port
///
/// Only the scheme and authority matter; the path is forwarded untouched
/// inside the raw head.
fn parse_absolute_url(url: &str) -> Result<(String, u16), RequestError> {
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(RequestError::UnsupportedTarget(url.to_string()));
    };

    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    if authority.is_empty() {
        return Err(RequestError::UnsupportedTarget(url.to_string()));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| RequestError::InvalidPort(url.to_string()))?;
            (host, port)
        }
        None => {
            let default_port = if scheme.eq_ignore_ascii_case("https") {
                443
            } else {
                80
            };
            (authority, default_port)
        }
    };

    if host.is_empty() {
        return Err(RequestError::UnsupportedTarget(url.to_string()));
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request() {
        let head = RequestHead::parse(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.method, "CONNECT");
        assert_eq!(head.host, "example.com");
        assert_eq!(head.port, 443);
        assert!(head.is_connect());
    }

    #[test]
    fn test_connect_bad_port() {
        let result = RequestHead::parse(b"CONNECT example.com:https HTTP/1.1\r\n\r\n");
        assert!(matches!(result, Err(RequestError::InvalidPort(_))));
    }

    #[test]
    fn test_connect_missing_port() {
        let result = RequestHead::parse(b"CONNECT example.com HTTP/1.1\r\n\r\n");
        assert!(matches!(result, Err(RequestError::InvalidAuthority(_))));
    }

    #[test]
    fn test_plain_request_with_host_header() {
        let raw = b"GET /foo HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.host, "example.com");
        assert_eq!(head.port, 80);
        assert!(!head.is_connect());
    }

    #[test]
    fn test_host_header_wins_over_url() {
        // With a Host header present the URL's port is not consulted.
        let raw = b"GET http://other.example:9999/ HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.host, "example.com");
        assert_eq!(head.port, 80);
    }

    #[test]
    fn test_absolute_url_explicit_port() {
        let raw = b"GET http://example.com:8081/path?q=1 HTTP/1.1\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.host, "example.com");
        assert_eq!(head.port, 8081);
    }

    #[test]
    fn test_absolute_url_scheme_defaults() {
        let head = RequestHead::parse(b"GET http://example.com/ HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.port, 80);

        let head = RequestHead::parse(b"GET https://example.com/ HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.port, 443);
    }

    #[test]
    fn test_empty_first_line() {
        let result = RequestHead::parse(b"\r\n\r\n");
        assert!(matches!(result, Err(RequestError::MalformedRequestLine(_))));

        let result = RequestHead::parse(b"");
        assert!(matches!(result, Err(RequestError::MalformedRequestLine(_))));
    }

    #[test]
    fn test_wrong_token_count() {
        let result = RequestHead::parse(b"GET /foo\r\n\r\n");
        assert!(matches!(result, Err(RequestError::MalformedRequestLine(_))));

        let result = RequestHead::parse(b"GET /foo HTTP/1.1 extra\r\n\r\n");
        assert!(matches!(result, Err(RequestError::MalformedRequestLine(_))));
    }

    #[test]
    fn test_no_host_and_relative_target() {
        let result = RequestHead::parse(b"GET /foo HTTP/1.1\r\nAccept: */*\r\n\r\n");
        assert!(matches!(result, Err(RequestError::UnsupportedTarget(_))));
    }

    #[test]
    fn test_full_size_head_without_destination() {
        // A head of exactly the read cap with no Host header and a
        // non-URL target still fails cleanly.
        let mut raw = b"GET /x HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_HEAD_SIZE - raw.len()));
        assert_eq!(raw.len(), MAX_HEAD_SIZE);

        let result = RequestHead::parse(&raw);
        assert!(matches!(result, Err(RequestError::UnsupportedTarget(_))));
    }

    #[test]
    fn test_raw_bytes_retained_verbatim() {
        let raw = b"GET http://example.com/foo HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.raw(), raw.as_slice());
    }

    #[test]
    fn test_display() {
        let head = RequestHead::parse(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(head.to_string(), "CONNECT example.com:443");
    }
}
