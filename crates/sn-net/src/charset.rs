//! Response body text decoding.

use encoding_rs::Encoding;

const META_SCAN_BYTES: usize = 8192;

/// Decodes `body` using the document's `<meta charset>` (HTML only), then the
/// `Content-Type` charset, then a BOM, falling back to lossy UTF-8.
pub fn decode_text_response(body: &[u8], content_type: &str) -> String {
    if let Some(label) = detect_response_charset(body, content_type) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (decoded, used, had_errors) = encoding.decode(body);
            if had_errors {
                tracing::debug!(charset = used.name(), "replaced malformed bytes while decoding");
            }
            return decoded.into_owned();
        }
        tracing::debug!(%label, "unknown charset label");
    }

    if let Some((encoding, _)) = Encoding::for_bom(body) {
        let (decoded, _, _) = encoding.decode(body);
        return decoded.into_owned();
    }

    String::from_utf8_lossy(body).to_string()
}

pub fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(mime.as_str(), "text/html" | "application/xhtml+xml")
}

fn detect_response_charset(body: &[u8], content_type: &str) -> Option<String> {
    if is_html_content_type(content_type) {
        if let Some(meta_charset) = parse_charset_from_html_prefix(body) {
            return Some(meta_charset);
        }
    }

    parse_charset_from_content_type(content_type)
}

fn parse_charset_from_content_type(content_type: &str) -> Option<String> {
    for part in content_type.split(';').skip(1) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("charset") {
            continue;
        }

        let label = value.trim().trim_matches('"').trim_matches('\'');
        if !label.is_empty() {
            return Some(label.to_owned());
        }
    }

    None
}

fn parse_charset_from_html_prefix(body: &[u8]) -> Option<String> {
    let prefix_len = body.len().min(META_SCAN_BYTES);
    let prefix = String::from_utf8_lossy(&body[..prefix_len]);
    let lower = prefix.to_ascii_lowercase();
    let mut search_start = 0_usize;

    while let Some(relative) = lower[search_start..].find("charset=") {
        let charset_start = search_start + relative + "charset=".len();
        if let Some(label) = parse_charset_label(&prefix[charset_start..]) {
            return Some(label);
        }
        search_start = charset_start;
    }

    None
}

fn parse_charset_label(input: &str) -> Option<String> {
    let trimmed = input.trim_start();
    let first = trimmed.chars().next()?;

    let label = if first == '"' || first == '\'' {
        let rest = &trimmed[first.len_utf8()..];
        let end = rest.find(first)?;
        rest[..end].trim()
    } else {
        let end = trimmed
            .find(|ch: char| ch.is_whitespace() || matches!(ch, '"' | '\'' | ';' | '>' | '/'))
            .unwrap_or(trimmed.len());
        trimmed[..end].trim()
    };

    if label.is_empty() {
        None
    } else {
        Some(label.to_owned())
    }
}
