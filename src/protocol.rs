//! Pagination protocol codec.
//!
//! Plain text, newline-delimited, no length prefix:
//!
//! ```text
//! Request:   <p>,<k>\n
//! Stop:      STOP
//! Response:  <w0>,<w1>,...,<wn>\n        window inside the store
//!            <w0>,...,<wn>,EOF\n         window reaching the end
//!            EOF\n                       offset already past the end
//!            ,ERROR <reason>\n           request refused
//! ```
//!
//! The sentinel is always the last comma-separated token of a response line,
//! whether or not words precede it. Words are never empty, so a page line
//! never starts with a comma; the leading comma keeps refusals apart from
//! pages whatever the words contain.

use bytes::BytesMut;
use std::str;
use thiserror::Error;

/// End-of-stream sentinel token.
pub const SENTINEL: &str = "EOF";

/// Termination control message.
pub const STOP: &[u8] = b"STOP";

/// Largest request frame accepted before a newline must appear.
pub const MAX_REQUEST_LEN: usize = 128;

/// Largest response line a client will buffer.
pub const MAX_RESPONSE_LEN: usize = 16 * 1024 * 1024;

const REFUSAL_PREFIX: &str = ",ERROR ";

/// A request for `stride` words starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub stride: usize,
}

/// A decoded page of words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResponse {
    pub words: Vec<String>,
    pub end_of_stream: bool,
}

/// Protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("invalid UTF-8 in message")]
    InvalidUtf8,
    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },
    #[error("server refused request: {0}")]
    Server(String),
    #[error("peer closed the connection mid-frame")]
    UnexpectedEof,
}

/// A complete client-to-server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Request(PageRequest),
    Stop,
}

/// Result of parsing the server's receive buffer.
#[derive(Debug)]
pub enum ParseResult {
    /// A frame and the number of bytes it occupied.
    Complete(Frame, usize),
    /// Need more data.
    Incomplete,
    /// Bad frame; the given number of bytes should be discarded.
    Error(ProtocolError, usize),
}

pub fn encode_request(offset: usize, stride: usize) -> BytesMut {
    BytesMut::from(format!("{offset},{stride}\n").as_bytes())
}

/// Decode one request line (trailing line ending optional).
pub fn decode_request(line: &[u8]) -> Result<PageRequest, ProtocolError> {
    let line = str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
    let line = line.trim_end_matches(['\r', '\n']);

    let tokens: Vec<&str> = line.split(',').collect();
    if tokens.len() != 2 {
        return Err(ProtocolError::MalformedRequest(format!(
            "expected '<p>,<k>', got {} token(s)",
            tokens.len()
        )));
    }

    let offset = parse_number(tokens[0], "offset")?;
    let stride = parse_number(tokens[1], "stride")?;
    if stride == 0 {
        return Err(ProtocolError::MalformedRequest(
            "stride must be positive".to_string(),
        ));
    }

    Ok(PageRequest { offset, stride })
}

fn parse_number(token: &str, name: &str) -> Result<usize, ProtocolError> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::MalformedRequest(format!(
            "{name} '{token}' is not a non-negative integer"
        )));
    }
    token
        .parse()
        .map_err(|_| ProtocolError::MalformedRequest(format!("{name} '{token}' out of range")))
}

/// Encode a page, appending the sentinel when `end_of_stream` is set.
///
/// Words must be non-empty and free of commas and newlines.
pub fn encode_response<S: AsRef<str>>(words: &[S], end_of_stream: bool) -> BytesMut {
    let len: usize = words.iter().map(|w| w.as_ref().len() + 1).sum();
    let mut out = BytesMut::with_capacity(len + SENTINEL.len() + 2);

    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b",");
        }
        out.extend_from_slice(word.as_ref().as_bytes());
    }

    if end_of_stream {
        if !words.is_empty() {
            out.extend_from_slice(b",");
        }
        out.extend_from_slice(SENTINEL.as_bytes());
    }

    out.extend_from_slice(b"\n");
    out
}

/// Decode a response. Embedded newlines are extra split points, so a page
/// spread over several physical lines decodes the same as a single line.
pub fn decode_response(data: &[u8]) -> Result<PageResponse, ProtocolError> {
    let text = str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;

    if let Some(reason) = text.strip_prefix(REFUSAL_PREFIX) {
        return Err(ProtocolError::Server(reason.trim().to_string()));
    }

    let mut response = PageResponse::default();
    for token in tokens(text) {
        if token == SENTINEL {
            response.end_of_stream = true;
        } else {
            response.words.push(token.to_string());
        }
    }
    Ok(response)
}

/// Encode a refusal for a request the server could not serve.
pub fn encode_error(reason: &str) -> BytesMut {
    BytesMut::from(format!("{REFUSAL_PREFIX}{reason}\n").as_bytes())
}

pub fn encode_stop() -> &'static [u8] {
    STOP
}

/// Split text into word tokens on commas and line breaks, dropping empties.
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split([',', '\n'])
        .map(|t| t.trim_end_matches('\r'))
        .filter(|t| !t.is_empty())
}

/// Parse one frame from the front of the server's receive buffer.
pub fn parse_frame(input: &[u8]) -> ParseResult {
    if input.starts_with(STOP) {
        let consumed = match input.get(STOP.len()) {
            Some(b'\n') => STOP.len() + 1,
            Some(b'\r') if input.get(STOP.len() + 1) == Some(&b'\n') => STOP.len() + 2,
            _ => STOP.len(),
        };
        return ParseResult::Complete(Frame::Stop, consumed);
    }

    match find_newline(input) {
        Some(pos) => {
            let consumed = pos + 1;
            match decode_request(&input[..pos]) {
                Ok(request) => ParseResult::Complete(Frame::Request(request), consumed),
                Err(e) => ParseResult::Error(e, consumed),
            }
        }
        None if input.len() > MAX_REQUEST_LEN => ParseResult::Error(
            ProtocolError::FrameTooLong {
                limit: MAX_REQUEST_LEN,
            },
            input.len(),
        ),
        None => ParseResult::Incomplete,
    }
}

/// Find `\n` in buffer.
pub(crate) fn find_newline(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}
