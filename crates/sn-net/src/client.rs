//! Blocking HTTP/1.1 GET client used by the document fetcher.
//!
//! Every request is sent with `Connection: close`; there is no connection reuse.

use crate::http::Header;
use crate::http::HttpMethod;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::http::HttpVersion;
use crate::tls::TlsConnector;
use crate::tls::TrustStoreMode;
use crate::transport::BoxedIoStream;
use crate::transport::connect_first_available;
use crate::transport::resolve;
use crate::url::NavUrl;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use sn_core::NavError;
use sn_core::NavResult;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::time::Duration;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;
const MAX_RESPONSE_BODY_BYTES: usize = 32 * 1024 * 1024;
const USER_AGENT: &str = concat!("swapnav/", env!("CARGO_PKG_VERSION"));
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5";

/// Client settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub trust_store: TrustStoreMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_redirects: 5,
            trust_store: TrustStoreMode::WebPkiOnly,
        }
    }
}

/// Final response of a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    pub final_url: NavUrl,
    pub response: HttpResponse,
    pub redirects_followed: usize,
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    config: ClientConfig,
    tls: TlsConnector,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> NavResult<Self> {
        let tls = TlsConnector::new(config.trust_store)?;
        Ok(Self { config, tls })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Issues one GET without following redirects.
    pub fn get(&self, url: &NavUrl) -> NavResult<HttpResponse> {
        let request = HttpRequest::builder(HttpMethod::Get, url.clone())
            .header("User-Agent", USER_AGENT)?
            .header("Accept", ACCEPT_HTML)?
            .header("Accept-Encoding", "gzip, deflate, br")?
            .header("Connection", "close")?
            .build()?;

        let mut stream = self.open_stream(url)?;
        write_request(&mut *stream, &request)?;
        read_response(&mut *stream, &request)
    }

    /// GETs `url`, following up to `max_redirects` redirects.
    pub fn get_following_redirects(&self, url: &NavUrl) -> NavResult<FetchedResponse> {
        let max_redirects = self.config.max_redirects;
        let mut current = url.clone();
        let mut redirects_followed = 0_usize;

        loop {
            let response = self.get(&current)?;
            tracing::debug!(
                url = %current,
                status = response.status.as_u16(),
                "received response"
            );

            if response.status.is_redirect() {
                if let Some(location) = response.header("location") {
                    if redirects_followed >= max_redirects {
                        return Err(NavError::new(
                            "net.http.too_many_redirects",
                            format!("too many redirects (>{max_redirects}) while loading {url}"),
                        ));
                    }
                    current = current.join(location)?;
                    redirects_followed = redirects_followed.saturating_add(1);
                    continue;
                }
            }

            return Ok(FetchedResponse {
                final_url: current,
                response,
                redirects_followed,
            });
        }
    }

    fn open_stream(&self, url: &NavUrl) -> NavResult<BoxedIoStream> {
        let addresses = resolve(url.host(), url.port())?;
        let stream = connect_first_available(&addresses, self.config.timeout)?;
        if url.is_secure() {
            self.tls.connect(stream, url.host())
        } else {
            Ok(Box::new(stream))
        }
    }
}

fn write_request(stream: &mut dyn Write, request: &HttpRequest) -> NavResult<()> {
    stream.write_all(&request.encode()).map_err(|error| {
        NavError::new(
            "net.http.write_failed",
            format!("failed to write HTTP request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        NavError::new(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })
}

fn read_response(stream: &mut dyn Read, request: &HttpRequest) -> NavResult<HttpResponse> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }

        let read = stream.read(&mut chunk).map_err(|error| {
            NavError::new(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;

        if read == 0 {
            return Err(NavError::new(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(NavError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }
    };

    let head_text = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut body_bytes = buffer[header_end..].to_vec();

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let (version, status) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            NavError::new(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    let has_transfer_encoding = headers
        .iter()
        .any(|header| header.name.eq_ignore_ascii_case("transfer-encoding"));
    let has_chunked_transfer = header_contains(&headers, "transfer-encoding", "chunked");
    if has_transfer_encoding && !has_chunked_transfer {
        return Err(NavError::new(
            "net.http.transfer_encoding_unsupported",
            "only chunked transfer encoding is supported",
        ));
    }

    let has_no_body =
        request.method == HttpMethod::Head || status_disallows_body(status.as_u16());

    if has_no_body {
        body_bytes.clear();
    } else if has_chunked_transfer {
        body_bytes = read_chunked_body(stream, body_bytes)?;
    } else if let Some(len) = parse_content_length(&headers)? {
        if len > MAX_RESPONSE_BODY_BYTES {
            return Err(body_too_large());
        }
        if body_bytes.len() < len {
            let mut rest = vec![0_u8; len - body_bytes.len()];
            stream.read_exact(&mut rest).map_err(|error| {
                NavError::new(
                    "net.http.read_body_failed",
                    format!("failed to read HTTP body bytes: {error}"),
                )
            })?;
            body_bytes.extend_from_slice(&rest);
        } else {
            body_bytes.truncate(len);
        }
    } else {
        // Close-delimited body; the request always asks for `Connection: close`.
        let remaining = MAX_RESPONSE_BODY_BYTES.saturating_sub(body_bytes.len()) as u64 + 1;
        Read::take(&mut *stream, remaining)
            .read_to_end(&mut body_bytes)
            .map_err(|error| {
                NavError::new(
                    "net.http.read_body_failed",
                    format!("failed while draining close-delimited response body: {error}"),
                )
            })?;
        if body_bytes.len() > MAX_RESPONSE_BODY_BYTES {
            return Err(body_too_large());
        }
    }

    if !has_no_body {
        body_bytes = decode_content_encoding(&headers, &body_bytes)?;
    }

    Ok(HttpResponse {
        version,
        status,
        headers,
        body: body_bytes,
    })
}

fn read_chunked_body(stream: &mut dyn Read, prefetched: Vec<u8>) -> NavResult<Vec<u8>> {
    let mut reader = BufReader::new(Cursor::new(prefetched).chain(stream));
    let mut decoded = Vec::new();

    loop {
        let size_line = read_chunk_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            NavError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            // Trailers are read and discarded.
            while !read_chunk_line(&mut reader)?.is_empty() {}
            return Ok(decoded);
        }

        let start = decoded.len();
        let end = start
            .checked_add(chunk_size)
            .filter(|end| *end <= MAX_RESPONSE_BODY_BYTES)
            .ok_or_else(body_too_large)?;
        decoded.resize(end, 0);
        reader
            .read_exact(&mut decoded[start..])
            .map_err(chunk_read_error)?;

        let mut terminator = [0_u8; 2];
        reader.read_exact(&mut terminator).map_err(chunk_read_error)?;
        if terminator != *b"\r\n" {
            return Err(NavError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }
}

/// One CRLF-terminated chunk metadata line, without the CRLF.
fn read_chunk_line(reader: &mut impl BufRead) -> NavResult<String> {
    let mut line = Vec::new();
    reader
        .by_ref()
        .take(MAX_CHUNK_LINE_BYTES as u64 + 2)
        .read_until(b'\n', &mut line)
        .map_err(chunk_read_error)?;

    match line.strip_suffix(b"\r\n") {
        Some(content) => Ok(String::from_utf8_lossy(content).into_owned()),
        None if line.len() > MAX_CHUNK_LINE_BYTES => Err(NavError::new(
            "net.http.chunk_line_too_large",
            format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
        )),
        None => Err(NavError::new(
            "net.http.unexpected_eof",
            "chunked body ended before a complete line",
        )),
    }
}

fn body_too_large() -> NavError {
    NavError::new(
        "net.http.body_too_large",
        format!("HTTP response body exceeds {MAX_RESPONSE_BODY_BYTES} bytes"),
    )
}

fn chunk_read_error(error: std::io::Error) -> NavError {
    NavError::new(
        "net.http.read_body_failed",
        format!("failed while reading chunked HTTP body: {error}"),
    )
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> NavResult<(HttpVersion, HttpStatusCode)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let code_text = parts.next().ok_or_else(|| {
        NavError::new(
            "net.http.status_line_invalid",
            format!("missing status code in status line `{line}`"),
        )
    })?;

    let version = match version {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        other => {
            return Err(NavError::new(
                "net.http.version_unsupported",
                format!("unsupported response version `{other}`"),
            ));
        }
    };

    let code_value = code_text.parse::<u16>().map_err(|error| {
        NavError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;

    Ok((version, HttpStatusCode::new(code_value)?))
}

fn parse_content_length(headers: &[Header]) -> NavResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers {
        if !header.name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let parsed = header.value.trim().parse::<usize>().map_err(|error| {
            NavError::new(
                "net.http.content_length_invalid",
                format!("invalid Content-Length `{}`: {error}", header.value),
            )
        })?;

        match value {
            Some(existing) if existing != parsed => {
                return Err(NavError::new(
                    "net.http.content_length_conflict",
                    "conflicting Content-Length headers in response",
                ));
            }
            _ => value = Some(parsed),
        }
    }

    Ok(value)
}

fn status_disallows_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

fn decode_content_encoding(headers: &[Header], body: &[u8]) -> NavResult<Vec<u8>> {
    let encodings: Vec<String> = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut decoded = body.to_vec();
    // Encodings are listed in the order they were applied.
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(Cursor::new(&decoded)), "gzip")?,
            "deflate" => decode_deflate(&decoded)?,
            "br" => read_all(Decompressor::new(Cursor::new(&decoded), 4096), "brotli")?,
            _ => {
                return Err(NavError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn decode_deflate(body: &[u8]) -> NavResult<Vec<u8>> {
    // Servers disagree on whether `deflate` means zlib-wrapped or raw.
    if let Ok(decoded) = read_all(ZlibDecoder::new(Cursor::new(body)), "deflate") {
        return Ok(decoded);
    }
    read_all(DeflateDecoder::new(Cursor::new(body)), "deflate")
}

fn read_all(decoder: impl Read, name: &str) -> NavResult<Vec<u8>> {
    let mut decoded = Vec::new();
    decoder
        .take(MAX_RESPONSE_BODY_BYTES as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|error| {
            NavError::new(
                "net.http.decode_failed",
                format!("{name} decode failed: {error}"),
            )
        })?;
    if decoded.len() > MAX_RESPONSE_BODY_BYTES {
        return Err(body_too_large());
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::MAX_RESPONSE_BODY_BYTES;
    use super::decode_content_encoding;
    use super::parse_status_line;
    use super::read_chunked_body;
    use super::read_response;
    use crate::http::Header;
    use crate::http::HttpMethod;
    use crate::http::HttpRequest;
    use crate::url::NavUrl;
    use brotli::CompressorWriter;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use flate2::write::ZlibEncoder;
    use std::io::Cursor;
    use std::io::Write;

    fn get_request(raw_url: &str) -> HttpRequest {
        let url = match NavUrl::parse(raw_url) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        match HttpRequest::builder(HttpMethod::Get, url).build() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn header(name: &str, value: &str) -> Header {
        match Header::new(name, value) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn status_line_parser_accepts_http_10_and_11() {
        assert!(parse_status_line("HTTP/1.1 200 OK").is_ok());
        assert!(parse_status_line("HTTP/1.0 404 Not Found").is_ok());
        assert!(parse_status_line("HTTP/3 200").is_err());
        assert!(parse_status_line("garbage").is_err());
    }

    #[test]
    fn decodes_chunked_body() {
        let prefetched = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nX-Trailer: y\r\n\r\n".to_vec();
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, prefetched);
        assert_eq!(decoded, Ok(b"Wikipedia".to_vec()));
    }

    #[test]
    fn chunked_decode_reports_invalid_size() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, b"Z\r\nx\r\n0\r\n\r\n".to_vec());
        assert!(matches!(decoded, Err(error) if error.code == "net.http.chunk_size_invalid"));
    }

    #[test]
    fn chunked_decode_reads_past_prefetched_bytes() {
        let mut stream = Cursor::new(b"pedia\r\n0\r\n\r\n".to_vec());
        let decoded = read_chunked_body(&mut stream, b"4\r\nWiki\r\n5\r\n".to_vec());
        assert_eq!(decoded, Ok(b"Wikipedia".to_vec()));
    }

    #[test]
    fn chunked_decode_rejects_truncated_stream() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let decoded = read_chunked_body(&mut stream, b"4\r\nWiki\r\n5".to_vec());
        assert!(matches!(decoded, Err(error) if error.code == "net.http.unexpected_eof"));
    }

    #[test]
    fn chunked_decode_rejects_overflowing_chunk_size() {
        let mut stream = Cursor::new(b"x".to_vec());
        let decoded = read_chunked_body(&mut stream, b"1\r\nA\r\nffffffffffffffff\r\n".to_vec());
        assert!(matches!(decoded, Err(error) if error.code == "net.http.body_too_large"));
    }

    #[test]
    fn chunked_decode_rejects_chunk_past_body_cap() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let line = format!("{:x}\r\n", MAX_RESPONSE_BODY_BYTES + 1);
        let decoded = read_chunked_body(&mut stream, line.into_bytes());
        assert!(matches!(decoded, Err(error) if error.code == "net.http.body_too_large"));
    }

    #[test]
    fn rejects_oversized_content_length_without_reading() {
        let request = get_request("http://localhost/");
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nshort";
        let outcome = read_response(&mut Cursor::new(raw.to_vec()), &request);
        assert!(matches!(outcome, Err(error) if error.code == "net.http.body_too_large"));
    }

    #[test]
    fn reads_content_length_body() {
        let request = get_request("http://localhost/");
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\n\r\nhello trailing";
        let response = match read_response(&mut Cursor::new(raw.to_vec()), &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.body, b"hello");
        assert_eq!(response.content_type(), "text/html");
    }

    #[test]
    fn reads_close_delimited_body() {
        let request = get_request("http://localhost/");
        let raw = b"HTTP/1.0 404 Not Found\r\n\r\n<h1>missing</h1>";
        let response = match read_response(&mut Cursor::new(raw.to_vec()), &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.status.as_u16(), 404);
        assert_eq!(response.body, b"<h1>missing</h1>");
    }

    #[test]
    fn reads_chunked_response_split_across_head() {
        let request = get_request("https://example.com/chunked");
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let response = match read_response(&mut Cursor::new(raw.to_vec()), &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.body, b"Wikipedia");
    }

    #[test]
    fn rejects_unsupported_transfer_encoding() {
        let request = get_request("https://example.com/");
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\n\r\nbody";
        let outcome = read_response(&mut Cursor::new(raw.to_vec()), &request);
        assert!(
            matches!(outcome, Err(error) if error.code == "net.http.transfer_encoding_unsupported")
        );
    }

    #[test]
    fn no_content_has_empty_body() {
        let request = get_request("https://example.com/");
        let raw = b"HTTP/1.1 204 No Content\r\n\r\nignored";
        let response = match read_response(&mut Cursor::new(raw.to_vec()), &request) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert!(response.body.is_empty());
    }

    #[test]
    fn decodes_gzip_and_deflate_content_encoding() {
        let mut gzipped = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut gzipped, Compression::default());
            assert!(encoder.write_all(b"hello gzip").is_ok());
            assert!(encoder.finish().is_ok());
        }
        let decoded = decode_content_encoding(&[header("Content-Encoding", "gzip")], &gzipped);
        assert_eq!(decoded, Ok(b"hello gzip".to_vec()));

        let mut zlibbed = Vec::new();
        {
            let mut encoder = ZlibEncoder::new(&mut zlibbed, Compression::default());
            assert!(encoder.write_all(b"hello deflate").is_ok());
            assert!(encoder.finish().is_ok());
        }
        let decoded = decode_content_encoding(&[header("Content-Encoding", "deflate")], &zlibbed);
        assert_eq!(decoded, Ok(b"hello deflate".to_vec()));
    }

    #[test]
    fn decodes_brotli_content_encoding() {
        let mut encoded = Vec::new();
        {
            let mut writer = CompressorWriter::new(&mut encoded, 4096, 5, 22);
            assert!(writer.write_all(b"hello br").is_ok());
            assert!(writer.flush().is_ok());
        }

        let decoded = decode_content_encoding(&[header("Content-Encoding", "br")], &encoded);
        assert_eq!(decoded, Ok(b"hello br".to_vec()));
    }

    #[test]
    fn rejects_unknown_content_encoding() {
        let decoded = decode_content_encoding(&[header("Content-Encoding", "zstd")], b"x");
        assert!(decoded.is_err());
    }
}
