//! HTTP request/response types.

use crate::url::NavUrl;
use sn_core::NavError;
use sn_core::NavResult;

/// Outbound methods the navigation client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

/// Single HTTP header with validated wire-safe name/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> NavResult<Self> {
        if name.is_empty() || !name.bytes().all(is_token_char) {
            return Err(NavError::new(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(NavError::new(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: NavUrl,
    pub version: HttpVersion,
    pub headers: Vec<Header>,
}

impl HttpRequest {
    pub fn builder(method: HttpMethod, url: NavUrl) -> HttpRequestBuilder {
        HttpRequestBuilder {
            method,
            url,
            headers: Vec::new(),
        }
    }

    pub fn request_target(&self) -> String {
        self.url.path_and_query()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Wire encoding of the request head.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::new();
        encoded.extend_from_slice(self.method.as_str().as_bytes());
        encoded.push(b' ');
        encoded.extend_from_slice(self.request_target().as_bytes());
        encoded.push(b' ');
        encoded.extend_from_slice(self.version.as_str().as_bytes());
        encoded.extend_from_slice(b"\r\n");

        for header in &self.headers {
            encoded.extend_from_slice(header.name.as_bytes());
            encoded.extend_from_slice(b": ");
            encoded.extend_from_slice(header.value.as_bytes());
            encoded.extend_from_slice(b"\r\n");
        }
        encoded.extend_from_slice(b"\r\n");
        encoded
    }
}

/// Builder for `HttpRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestBuilder {
    method: HttpMethod,
    url: NavUrl,
    headers: Vec<Header>,
}

impl HttpRequestBuilder {
    pub fn header(mut self, name: &str, value: &str) -> NavResult<Self> {
        self.headers.push(Header::new(name, value)?);
        Ok(self)
    }

    pub fn build(mut self) -> NavResult<HttpRequest> {
        let hosts = self
            .headers
            .iter()
            .filter(|header| header.name.eq_ignore_ascii_case("host"))
            .count();
        if hosts > 1 {
            return Err(NavError::new(
                "net.http.duplicate_header",
                "header `host` must appear at most once",
            ));
        }
        if hosts == 0 {
            let host = self.url.authority();
            self.headers.insert(0, Header::new("Host", &host)?);
        }

        Ok(HttpRequest {
            method: self.method,
            url: self.url,
            version: HttpVersion::Http11,
            headers: self.headers,
        })
    }
}

/// HTTP status code wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub fn new(code: u16) -> NavResult<Self> {
        if (100..=599).contains(&code) {
            return Ok(Self(code));
        }

        Err(NavError::new(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..=299).contains(&self.0)
    }

    pub fn is_redirect(self) -> bool {
        matches!(self.0, 301 | 302 | 303 | 307 | 308)
    }
}

/// Fully read, content-decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: HttpVersion,
    pub status: HttpStatusCode,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or_default()
    }
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

#[cfg(test)]
mod tests {
    use super::Header;
    use super::HttpMethod;
    use super::HttpRequest;
    use super::HttpStatusCode;
    use crate::url::NavUrl;

    #[test]
    fn host_header_is_added_first() {
        let url = match NavUrl::parse("http://localhost:8080/posts/?page=2#c") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        let request = HttpRequest::builder(HttpMethod::Get, url)
            .header("Accept", "text/html")
            .and_then(|builder| builder.build());
        let request = match request {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(request.header("host"), Some("localhost:8080"));
        assert_eq!(
            request.encode(),
            b"GET /posts/?page=2 HTTP/1.1\r\nHost: localhost:8080\r\nAccept: text/html\r\n\r\n"
                .to_vec()
        );
    }

    #[test]
    fn rejects_header_injection() {
        assert!(Header::new("X-Test", "a\r\nb").is_err());
        assert!(Header::new("Bad Name", "v").is_err());
    }

    #[test]
    fn status_code_classes() {
        assert!(HttpStatusCode::new(99).is_err());
        assert!(HttpStatusCode::new(600).is_err());
        let moved = match HttpStatusCode::new(308) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(moved.is_redirect());
        assert!(!moved.is_success());
    }
}
