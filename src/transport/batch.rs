//! `multipart/mixed` batch codec
//!
//! The batch endpoint takes several embedded HTTP requests in one body and answers
//! with one embedded HTTP response per request. Parts are correlated through the
//! `Content-ID` header: request part `<item-K>` is answered by `<response-item-K>`.
//! Responses may come back in any order.

use crate::error::{Error, Result};

/// One embedded HTTP response from a batch reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPart {
    /// Index of the request this answers, from its `Content-ID`
    pub index: Option<usize>,
    /// Status code of the embedded response
    pub status: u16,
    /// Body of the embedded response
    pub body: String,
}

/// Generate a boundary that will not collide with the embedded request text
pub fn new_boundary() -> String {
    format!("batch_{:016x}{:016x}", rand::random::<u64>(), rand::random::<u64>())
}

/// Encode one GET per path as a batch request body
///
/// `paths` are absolute request paths (already percent-encoded).
pub fn encode_request(boundary: &str, paths: &[String]) -> String {
    let mut body = String::with_capacity(paths.len() * 128);
    for (index, request_path) in paths.iter().enumerate() {
        body.push_str("--");
        body.push_str(boundary);
        body.push_str("\r\n");
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <item-{}>\r\n", index));
        body.push_str("\r\n");
        body.push_str(&format!("GET {}\r\n", request_path));
        body.push_str("Accept: application/json\r\n");
        body.push_str("\r\n");
    }
    body.push_str("--");
    body.push_str(boundary);
    body.push_str("--\r\n");
    body
}

/// Extract the `boundary` parameter from a `Content-Type` header value
pub fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';');
    let mime = params.next().unwrap_or("").trim();
    if !mime.eq_ignore_ascii_case("multipart/mixed") {
        return Err(Error::BatchProtocol(format!(
            "expected multipart/mixed response, got '{}'",
            mime
        )));
    }
    params
        .filter_map(|p| p.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::BatchProtocol("response has no multipart boundary".into()))
}

/// Decode a batch reply body into its embedded responses
pub fn decode_response(boundary: &str, body: &str) -> Result<Vec<BatchPart>> {
    let delimiter = format!("--{}", boundary);
    let mut segments = body.split(delimiter.as_str());

    // Preamble before the first delimiter
    segments.next();

    let mut parts = Vec::new();
    let mut closed = false;
    for segment in segments {
        if segment.starts_with("--") {
            closed = true;
            break;
        }
        let segment = segment.trim_start_matches(['\r', '\n']);
        if segment.trim().is_empty() {
            continue;
        }
        parts.push(decode_part(segment)?);
    }

    if !closed && parts.is_empty() {
        return Err(Error::BatchProtocol(
            "no parts found for the advertised boundary".into(),
        ));
    }
    Ok(parts)
}

fn decode_part(segment: &str) -> Result<BatchPart> {
    let (outer_headers, embedded) = split_head(segment)
        .ok_or_else(|| Error::BatchProtocol("part has no header terminator".into()))?;

    let index = header_value(outer_headers, "content-id").and_then(parse_content_id);

    let embedded = embedded.trim_start_matches(['\r', '\n']);
    let (response_head, response_body) = split_head(embedded).unwrap_or((embedded, ""));

    let status_line = response_head.lines().next().unwrap_or("").trim();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            Error::BatchProtocol(format!("invalid embedded status line '{}'", status_line))
        })?;

    Ok(BatchPart {
        index,
        status,
        body: response_body.trim_end_matches(['\r', '\n']).to_string(),
    })
}

/// Split at the first blank line, accepting both CRLF and bare LF line endings
fn split_head(text: &str) -> Option<(&str, &str)> {
    let crlf = text.find("\r\n\r\n").map(|at| (at, 4));
    let lf = text.find("\n\n").map(|at| (at, 2));
    let (at, len) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&text[..at], &text[at + len..]))
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

/// `<response-item-7>` -> 7
fn parse_content_id(value: &str) -> Option<usize> {
    value
        .trim_matches(['<', '>'])
        .rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
}
