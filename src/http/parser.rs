//! Hand-rolled HTTP/1.x request parser.
//!
//! Drives a small state machine — `Status → Header* → EndOfHeaders → Body?` —
//! over a bounded scratch buffer. The status line and headers are read
//! entirely into one [`Vec<u8>`], frozen into a [`Bytes`], and then walked by
//! [`HeaderEvents`], a synchronous, allocation-free iterator over
//! `{Status, Header, EndOfHeaders}` events whose header name/value slices
//! borrow directly from that frozen buffer. Header values stored on the
//! resulting [`Request`] are [`Bytes::slice_ref`] views into the same
//! allocation — no per-header copy.
//!
//! Body reading (`Content-Length` and `chunked`) is handled separately by
//! [`read_content_length_body`] and [`read_chunked_body`], since the body can
//! be arbitrarily larger than the bounded header scratch buffer.

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::http::{ConnectionType, Method, Version};
use crate::uri::{parse_authority, Uri, UriError};

/// Default size of the header scratch buffer: 64 KiB.
pub const DEFAULT_HEADER_BUFFER_SIZE: usize = 64 * 1024;

/// Hard cap on the header scratch buffer: 16 MiB.
pub const MAX_HEADER_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Maximum accepted length of a multipart boundary, per spec.
const MAX_BOUNDARY_LEN: usize = 70;

/// Errors surfaced while parsing an HTTP/1.x request.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid HTTP method")]
    InvalidMethod,
    #[error("invalid request URL")]
    InvalidUrl,
    #[error("invalid HTTP protocol version")]
    InvalidProtocol,
    #[error("missing headers")]
    MissingHeaders,
    #[error("malformed header line")]
    IncorrectHeader,
    #[error("line is not terminated with CRLF")]
    InvalidLineEnding,
    #[error("header block exceeds the configured buffer size")]
    HeadersTooLarge,
    #[error("malformed request body")]
    InvalidBody,
    #[error("HTTP/1.1 request is missing a Host header")]
    MissingHost,
    #[error("connection closed before a complete message was received")]
    EndOfStream,
    #[error("URI error: {0}")]
    Uri(#[from] UriError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What kind of form body, if any, the request carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormKind {
    None,
    UrlEncoded,
    Multipart { boundary: Bytes },
}

/// One event produced while walking a buffered request-line-plus-headers
/// block. Name/value slices borrow from the block that was passed to
/// [`HeaderEvents::new`].
#[derive(Debug, PartialEq, Eq)]
pub enum Event<'a> {
    Status {
        method_token: &'a [u8],
        target: &'a [u8],
        version_token: &'a [u8],
    },
    Header {
        name: &'a [u8],
        value: &'a [u8],
    },
    EndOfHeaders,
}

/// A synchronous, allocation-free iterator over the events in a raw
/// `status-line CRLF (header-line CRLF)* CRLF` block.
pub struct HeaderEvents<'a> {
    data: &'a [u8],
    pos: usize,
    parsed_status: bool,
    finished: bool,
}

impl<'a> HeaderEvents<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            parsed_status: false,
            finished: false,
        }
    }

    // Returns the next CRLF-terminated line's content (without the CRLF),
    // advancing `pos` past it. `InvalidLineEnding` if `\n` isn't preceded by `\r`.
    fn next_line(&mut self) -> Result<&'a [u8], ParseError> {
        let rest = &self.data[self.pos..];
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(ParseError::MissingHeaders)?;
        if nl == 0 || rest[nl - 1] != b'\r' {
            return Err(ParseError::InvalidLineEnding);
        }
        let line = &rest[..nl - 1];
        self.pos += nl + 1;
        Ok(line)
    }
}

impl<'a> Iterator for HeaderEvents<'a> {
    type Item = Result<Event<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.parsed_status {
            self.parsed_status = true;
            let line = match self.next_line() {
                Ok(line) => line,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            let mut parts = line.splitn(3, |&b| b == b' ');
            let method_token = match parts.next().filter(|s| !s.is_empty()) {
                Some(m) => m,
                None => {
                    self.finished = true;
                    return Some(Err(ParseError::InvalidMethod));
                }
            };
            let target = match parts.next().filter(|s| !s.is_empty()) {
                Some(t) => t,
                None => {
                    self.finished = true;
                    return Some(Err(ParseError::InvalidUrl));
                }
            };
            let version_token = match parts.next().filter(|s| !s.is_empty()) {
                Some(v) => v,
                None => {
                    self.finished = true;
                    return Some(Err(ParseError::InvalidProtocol));
                }
            };
            return Some(Ok(Event::Status {
                method_token,
                target,
                version_token,
            }));
        }

        let line = match self.next_line() {
            Ok(line) => line,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        if line.is_empty() {
            self.finished = true;
            return Some(Ok(Event::EndOfHeaders));
        }

        match find_subslice(line, b": ") {
            Some(pos) => Some(Ok(Event::Header {
                name: &line[..pos],
                value: &line[pos + 2..],
            })),
            None => {
                self.finished = true;
                Some(Err(ParseError::IncorrectHeader))
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A bounded scratch buffer for reading one request's status line and
/// headers, reused — at its configured capacity — across every request on a
/// keep-alive connection.
pub struct ScratchBuffer {
    max_len: usize,
}

impl ScratchBuffer {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Reads the request-line-plus-headers block from `reader`, stopping
    /// after the blank line that terminates the headers. Returns the whole
    /// block (including every CRLF) as a frozen [`Bytes`].
    ///
    /// An immediate EOF (zero bytes read before anything else was received)
    /// surfaces as [`ParseError::EndOfStream`] — the normal way a keep-alive
    /// peer closes the connection. An EOF mid-headers is also
    /// `EndOfStream`, since the message is simply incomplete.
    pub async fn read_headers<R>(&self, reader: &mut R) -> Result<Bytes, ParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf: Vec<u8> = Vec::with_capacity(512.min(self.max_len));
        loop {
            let before = buf.len();
            let n = reader.read_until(b'\n', &mut buf).await?;
            if n == 0 {
                return Err(ParseError::EndOfStream);
            }
            if buf.len() > self.max_len {
                return Err(ParseError::HeadersTooLarge);
            }
            // End of headers: the line we just read is a bare "\r\n".
            if buf.len() - before == 2 && buf[before..] == *b"\r\n" {
                return Ok(Bytes::from(buf));
            }
        }
    }
}

/// Parses a method token, per spec: unrecognized tokens resolve to `Method::Any`.
fn parse_method(token: &[u8]) -> Result<Method, ParseError> {
    let s = std::str::from_utf8(token).map_err(|_| ParseError::InvalidMethod)?;
    Ok(s.parse().expect("Method::from_str is infallible"))
}

fn parse_version(token: &[u8]) -> Result<Version, ParseError> {
    std::str::from_utf8(token)
        .map(|s| s.parse().expect("Version::from_str is infallible"))
        .map_err(|_| ParseError::InvalidProtocol)
}

/// The parsed head of a request (everything except the body), plus the
/// information the body/form readers need.
pub struct ParsedHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: crate::http::Headers,
    pub host: Option<String>,
    pub connection_type: ConnectionType,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub form_kind: FormKind,
}

/// Parses the status line and headers out of `block` (as produced by
/// [`ScratchBuffer::read_headers`]), recognizing the headers spec.md §4.2
/// calls out specially.
pub fn parse_head(block: Bytes) -> Result<ParsedHead, ParseError> {
    let mut events = HeaderEvents::new(&block);

    let (method, target, version) = match events.next() {
        Some(Ok(Event::Status {
            method_token,
            target,
            version_token,
        })) => (
            parse_method(method_token)?,
            target.to_vec(),
            parse_version(version_token)?,
        ),
        Some(Err(e)) => return Err(e),
        _ => return Err(ParseError::MissingHeaders),
    };

    let mut uri = Uri::parse(&target)?;

    let mut headers = crate::http::Headers::new();
    let mut host: Option<String> = None;
    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    let mut connection_type = ConnectionType::default_for(version);
    let mut form_kind = FormKind::None;

    loop {
        match events.next() {
            Some(Ok(Event::Header { name, value })) => {
                let name_str = std::str::from_utf8(name)
                    .map_err(|_| ParseError::IncorrectHeader)?
                    .to_string();
                let value_bytes = block.slice_ref(value);

                if name_str.eq_ignore_ascii_case("content-length") {
                    let s = std::str::from_utf8(value).map_err(|_| ParseError::IncorrectHeader)?;
                    content_length = Some(s.trim().parse().map_err(|_| ParseError::IncorrectHeader)?);
                } else if name_str.eq_ignore_ascii_case("transfer-encoding") {
                    let s = std::str::from_utf8(value).map_err(|_| ParseError::IncorrectHeader)?;
                    if s.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("chunked")) {
                        chunked = true;
                    }
                } else if name_str.eq_ignore_ascii_case("connection")
                    && version.is_1_1()
                    && connection_type == ConnectionType::KeepAlive
                {
                    let s = std::str::from_utf8(value).map_err(|_| ParseError::IncorrectHeader)?;
                    if s.trim().eq_ignore_ascii_case("close") {
                        connection_type = ConnectionType::Close;
                    }
                } else if name_str.eq_ignore_ascii_case("host") && host.is_none() {
                    let s = std::str::from_utf8(value).map_err(|_| ParseError::IncorrectHeader)?;
                    host = Some(s.to_string());
                    // The request target may already carry an authority (absolute-form,
                    // e.g. a proxy request); only the origin-form case is missing one.
                    if uri.host.is_none() {
                        parse_authority(&mut uri, value)?;
                    }
                } else if name_str.eq_ignore_ascii_case("content-type") {
                    let s = std::str::from_utf8(value).map_err(|_| ParseError::IncorrectHeader)?;
                    form_kind = parse_form_kind(s)?;
                }

                headers.insert_bytes(name_str, value_bytes);
            }
            Some(Ok(Event::EndOfHeaders)) => break,
            Some(Ok(Event::Status { .. })) => unreachable!("status line already consumed"),
            Some(Err(e)) => return Err(e),
            None => return Err(ParseError::MissingHeaders),
        }
    }

    if version.is_1_1() && host.is_none() {
        return Err(ParseError::MissingHost);
    }

    Ok(ParsedHead {
        method,
        uri,
        version,
        headers,
        host,
        connection_type,
        content_length,
        chunked,
        form_kind,
    })
}

fn parse_form_kind(content_type: &str) -> Result<FormKind, ParseError> {
    let lower = content_type.to_ascii_lowercase();
    if lower.starts_with("application/x-www-form-urlencoded") {
        return Ok(FormKind::UrlEncoded);
    }
    if let Some(rest) = lower.strip_prefix("multipart/form-data") {
        let params = content_type[content_type.len() - rest.len()..].to_string();
        for param in params.split(';').skip(1) {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("boundary=") {
                let value = value.trim_matches('"');
                if value.len() > MAX_BOUNDARY_LEN {
                    return Err(ParseError::IncorrectHeader);
                }
                return Ok(FormKind::Multipart {
                    boundary: Bytes::copy_from_slice(value.as_bytes()),
                });
            }
        }
        return Err(ParseError::IncorrectHeader);
    }
    Ok(FormKind::None)
}

/// Reads exactly `len` bytes of body from `reader`, preferring whatever is
/// already buffered.
pub async fn read_content_length_body<R>(reader: &mut R, len: u64) -> Result<Bytes, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let len = usize::try_from(len).map_err(|_| ParseError::InvalidBody)?;
    let mut body = vec![0u8; len];
    tokio::io::AsyncReadExt::read_exact(reader, &mut body)
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ParseError::EndOfStream
            } else {
                ParseError::Io(e)
            }
        })?;
    Ok(Bytes::from(body))
}

/// Reads a chunked-transfer-encoded body to completion, reassembling the
/// chunk payloads in order. Chunk extensions after `;` are ignored.
pub async fn read_chunked_body<R>(reader: &mut R) -> Result<Bytes, ParseError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let mut size_line = Vec::new();
        let n = reader.read_until(b'\n', &mut size_line).await?;
        if n == 0 {
            return Err(ParseError::EndOfStream);
        }
        if size_line.len() < 2 || size_line[size_line.len() - 2] != b'\r' {
            return Err(ParseError::InvalidLineEnding);
        }
        let size_line = &size_line[..size_line.len() - 2];
        let hex_part = size_line
            .split(|&b| b == b';')
            .next()
            .unwrap_or(size_line);
        let hex_str = std::str::from_utf8(hex_part).map_err(|_| ParseError::InvalidBody)?;
        let chunk_size =
            u64::from_str_radix(hex_str.trim(), 16).map_err(|_| ParseError::InvalidBody)?;

        if chunk_size == 0 {
            // Final chunk: consume the trailing CRLF (no trailers supported).
            let mut trailer = Vec::new();
            reader.read_until(b'\n', &mut trailer).await?;
            if trailer != b"\r\n" {
                return Err(ParseError::InvalidBody);
            }
            return Ok(Bytes::from(body));
        }

        let chunk_size = usize::try_from(chunk_size).map_err(|_| ParseError::InvalidBody)?;
        let mut chunk = vec![0u8; chunk_size];
        tokio::io::AsyncReadExt::read_exact(reader, &mut chunk)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    ParseError::EndOfStream
                } else {
                    ParseError::Io(e)
                }
            })?;
        body.extend_from_slice(&chunk);

        let mut crlf = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(reader, &mut crlf).await?;
        if crlf != *b"\r\n" {
            return Err(ParseError::InvalidBody);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(data: &[u8]) -> Vec<Event<'_>> {
        HeaderEvents::new(data).map(|e| e.unwrap()).collect()
    }

    #[test]
    fn simple_status_and_header_events() {
        let raw = b"GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let evs = events(raw);
        assert_eq!(
            evs[0],
            Event::Status {
                method_token: b"GET",
                target: b"/test",
                version_token: b"HTTP/1.1",
            }
        );
        assert_eq!(
            evs[1],
            Event::Header {
                name: b"Host",
                value: b"localhost",
            }
        );
        assert_eq!(evs[2], Event::EndOfHeaders);
    }

    #[test]
    fn missing_cr_is_invalid_line_ending() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\n\r\n";
        let mut iter = HeaderEvents::new(raw);
        assert!(matches!(iter.next(), Some(Ok(Event::Status { .. }))));
        assert!(matches!(
            iter.next(),
            Some(Err(ParseError::InvalidLineEnding))
        ));
    }

    #[test]
    fn header_without_colon_space_is_incorrect_header() {
        let raw = b"GET / HTTP/1.1\r\nHost localhost\r\n\r\n";
        let mut iter = HeaderEvents::new(raw);
        iter.next(); // status
        assert!(matches!(
            iter.next(),
            Some(Err(ParseError::IncorrectHeader))
        ));
    }

    #[tokio::test]
    async fn read_headers_stops_after_blank_line() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody-bytes-not-consumed";
        let mut reader = tokio::io::BufReader::new(&raw[..]);
        let scratch = ScratchBuffer::new(DEFAULT_HEADER_BUFFER_SIZE);
        let block = scratch.read_headers(&mut reader).await.unwrap();
        assert_eq!(&block[..], b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    }

    #[tokio::test]
    async fn read_headers_too_large_is_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(100));
        raw.extend_from_slice(b"\r\n\r\n");
        let mut reader = tokio::io::BufReader::new(&raw[..]);
        let scratch = ScratchBuffer::new(32);
        let err = scratch.read_headers(&mut reader).await.unwrap_err();
        assert!(matches!(err, ParseError::HeadersTooLarge));
    }

    #[test]
    fn parse_head_requires_host_under_http11() {
        let raw = Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n");
        let err = parse_head(raw).unwrap_err();
        assert!(matches!(err, ParseError::MissingHost));
    }

    #[test]
    fn parse_head_chunked_flag() {
        let raw = Bytes::from_static(
            b"GET / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        let head = parse_head(raw).unwrap();
        assert!(head.chunked);
    }

    #[test]
    fn parse_head_multipart_boundary() {
        let raw = Bytes::from_static(
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: multipart/form-data; boundary=\"abc123\"\r\n\r\n",
        );
        let head = parse_head(raw).unwrap();
        assert_eq!(
            head.form_kind,
            FormKind::Multipart {
                boundary: Bytes::from_static(b"abc123")
            }
        );
    }

    #[test]
    fn parse_head_host_authority_fills_uri() {
        let raw = Bytes::from_static(b"GET /test HTTP/1.1\r\nHost: localhost:8080\r\n\r\n");
        let head = parse_head(raw).unwrap();
        assert_eq!(head.host.as_deref(), Some("localhost:8080"));
        assert_eq!(head.uri.host.as_deref(), Some("localhost"));
        assert_eq!(head.uri.port, Some(8080));
    }

    #[tokio::test]
    async fn chunked_body_reassembles_in_order() {
        let raw = b"7\r\nMozilla\r\n9\r\nDeveloper\r\n7\r\nNetwork\r\n0\r\n\r\n";
        let mut reader = tokio::io::BufReader::new(&raw[..]);
        let body = read_chunked_body(&mut reader).await.unwrap();
        assert_eq!(&body[..], b"MozillaDeveloperNetwork");
    }

    #[tokio::test]
    async fn content_length_body_reads_exact_bytes() {
        let raw = b"some body!!!";
        let mut reader = tokio::io::BufReader::new(&raw[..]);
        let body = read_content_length_body(&mut reader, 9).await.unwrap();
        assert_eq!(&body[..], b"some body");
    }
}
