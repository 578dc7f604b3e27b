//! The parsed, in-memory representation of an HTTP/1.x request.

use bytes::Bytes;

use crate::uri::{self, Uri};

use super::form::{FormField, MultipartForm, UrlEncodedForm};
use super::parser::{self, FormKind, ParseError, ScratchBuffer};
use super::{ConnectionType, Headers, Method, Version};

/// A fully parsed HTTP/1.x request: the status line, headers, and body
/// produced by [`parser::parse_head`] plus whichever body-reading strategy
/// the headers called for.
///
/// # Examples
///
/// ```no_run
/// use rttp::http::Request;
/// use rttp::http::parser::ScratchBuffer;
///
/// # async fn read(mut stream: tokio::net::TcpStream) -> Result<(), rttp::http::parser::ParseError> {
/// let mut reader = tokio::io::BufReader::new(stream);
/// let scratch = ScratchBuffer::new(64 * 1024);
/// let request = Request::parse(&scratch, &mut reader).await?;
/// println!("{} {}", request.method(), request.path());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: Headers,
    host: Option<String>,
    connection_type: ConnectionType,
    form_kind: FormKind,
    body: Bytes,
}

impl Request {
    /// Reads and parses one request from `reader`, using `scratch` as the
    /// bounded header scratch buffer.
    pub async fn parse<R>(scratch: &ScratchBuffer, reader: &mut R) -> Result<Self, ParseError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let block = scratch.read_headers(reader).await?;
        let head = parser::parse_head(block)?;

        let body = match (head.chunked, head.content_length) {
            (true, _) => parser::read_chunked_body(reader).await?,
            (false, Some(len)) if len > 0 => parser::read_content_length_body(reader, len).await?,
            _ => Bytes::new(),
        };

        Ok(Self {
            method: head.method,
            uri: head.uri,
            version: head.version,
            headers: head.headers,
            host: head.host,
            connection_type: head.connection_type,
            form_kind: head.form_kind,
            body,
        })
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the parsed request-target URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the request path (without the query string), lexically
    /// resolved (`.`/`..` segments collapsed).
    pub fn path(&self) -> String {
        uri::resolve_path(&self.uri.path)
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.uri.query.as_deref()
    }

    /// Parses the query string into decoded `(key, value)` pairs.
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.uri
            .query
            .as_deref()
            .map(|q| uri::decode_query_string(q.as_bytes()))
            .unwrap_or_default()
    }

    /// Returns the HTTP protocol version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the `Host` header value, if present.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Returns whether the connection should be kept alive after this
    /// request completes.
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Returns the request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the value of the `Content-Length` header parsed as a `u64`,
    /// if present.
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length")?.parse().ok()
    }

    /// Returns the detected form encoding of the body, if any.
    pub fn form_kind(&self) -> &FormKind {
        &self.form_kind
    }

    /// Iterates the decoded fields of the request body, if it is a
    /// recognized form encoding. Returns `None` for requests whose
    /// `Content-Type` wasn't a form type.
    pub fn form_fields(&self) -> Option<Box<dyn Iterator<Item = FormField> + '_>> {
        match &self.form_kind {
            FormKind::None => None,
            FormKind::UrlEncoded => Some(Box::new(UrlEncodedForm::new(&self.body))),
            FormKind::Multipart { boundary } => {
                Some(Box::new(MultipartForm::new(&self.body, boundary)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &'static [u8]) -> Request {
        let mut reader = tokio::io::BufReader::new(raw);
        let scratch = ScratchBuffer::new(parser::DEFAULT_HEADER_BUFFER_SIZE);
        Request::parse(&scratch, &mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn parse_simple_get() {
        let req = parse(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert!(req.body().is_empty());
    }

    #[tokio::test]
    async fn parse_query_string() {
        let req = parse(b"GET /search?q=rust&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n").await;
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
        let params = req.query_params();
        assert_eq!(params[0], ("q".to_string(), "rust".to_string()));
        assert_eq!(params[1], ("page".to_string(), "2".to_string()));
    }

    #[tokio::test]
    async fn missing_host_is_rejected_on_http11() {
        let mut reader = tokio::io::BufReader::new(&b"GET / HTTP/1.1\r\n\r\n"[..]);
        let scratch = ScratchBuffer::new(parser::DEFAULT_HEADER_BUFFER_SIZE);
        let err = Request::parse(&scratch, &mut reader).await.unwrap_err();
        assert!(matches!(err, ParseError::MissingHost));
    }

    #[tokio::test]
    async fn connection_close_overrides_keep_alive_default() {
        let req = parse(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
        assert_eq!(req.connection_type(), ConnectionType::Close);
    }

    #[tokio::test]
    async fn content_length_body_is_read() {
        let req = parse(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello").await;
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&req.body()[..], b"hello");
    }

    #[tokio::test]
    async fn url_encoded_form_fields_are_iterable() {
        let req = parse(
            b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\na=1&b=2",
        )
        .await;
        let fields: Vec<_> = req.form_fields().unwrap().collect();
        assert_eq!(fields[0].name, "a");
        assert_eq!(fields[1].name, "b");
    }
}
