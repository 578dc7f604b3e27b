//! HTTP/1.1 response builder and wire serialization.
//!
//! Provides a fluent builder API for constructing a response in memory, and
//! [`Response::flush`] to serialize and write it through the connection's
//! buffered writer. `is_dirty`/`is_flushed` let the connection driver tell
//! whether a handler actually produced a response (so it can synthesize a
//! 404 when one didn't) and whether a response has already gone out on the
//! wire (so it's never written twice).

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{ConnectionType, Headers, StatusCode, Version};

/// An HTTP/1.x response, built up by handlers and middleware and then
/// flushed exactly once by the connection driver.
///
/// # Examples
///
/// ```
/// use rttp::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), StatusCode::Ok);
/// assert!(response.is_dirty());
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
    is_flushed: bool,
    is_dirty: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    ///
    /// Setting an explicit status is itself a write — a handler that returns
    /// `Response::new(StatusCode::NoContent)` has deliberately chosen that
    /// status, not left the response untouched — so this marks the response
    /// dirty. Internal call sites that need a response indistinguishable
    /// from "nothing was written" (the router's own trie-miss response, the
    /// driver's handler-wrote-nothing check) use [`Response::bare`] instead.
    pub fn new(status: StatusCode) -> Self {
        let mut response = Self::bare(status);
        response.is_dirty = true;
        response
    }

    /// Creates a response with the given status that is *not* marked dirty.
    ///
    /// Only for internal use by code paths that must stay distinguishable
    /// from a handler's genuine response: the router's trie-miss fallback
    /// and the connection driver's own bookkeeping.
    pub(crate) fn bare(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: BytesMut::new(),
            is_flushed: false,
            is_dirty: false,
        }
    }

    /// The connection driver's synthesized response for a handler that
    /// returned without writing anything (`is_flushed == false`).
    pub fn not_found() -> Self {
        Self::bare(StatusCode::NotFound).body("Resource not found")
    }

    /// Sets the status code.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.set_status(status);
        self
    }

    /// Sets the status code in place.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.is_dirty = true;
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    /// Appends a header in place. Intended for middleware that receives a
    /// `Response` from downstream and needs to decorate it without
    /// consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
        self.is_dirty = true;
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.set_body(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = BytesMut::from(body.into().as_slice());
        self.is_dirty = true;
        self
    }

    fn set_body(&mut self, body: impl AsRef<[u8]>) {
        self.body = BytesMut::from(body.as_ref());
        self.is_dirty = true;
    }

    /// Returns a mutable handle to the body buffer for handlers that want
    /// to write incrementally rather than replace the whole body.
    pub fn writer(&mut self) -> &mut BytesMut {
        self.is_dirty = true;
        &mut self.body
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// `true` once anything — a status, header, or body write — has been
    /// applied to this response.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// `true` once this response has been written to the wire by [`Response::flush`].
    pub fn is_flushed(&self) -> bool {
        self.is_flushed
    }

    fn render(&mut self, version: Version, connection_type: ConnectionType) -> BytesMut {
        let content_length = self.body.len();

        if content_length > 0 && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }
        if !self.headers.contains("content-length") {
            self.headers
                .insert("Content-Length", content_length.to_string());
        }
        if !self.headers.contains("connection") {
            let value = match connection_type {
                ConnectionType::KeepAlive => "keep-alive",
                ConnectionType::Close => "close",
            };
            self.headers.insert("Connection", value);
        }

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "{} {} {}\r\n",
                version,
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_ref());
        buf
    }

    /// Serializes this response and writes it through `writer`, then marks
    /// it flushed. A response already flushed is a no-op, so middleware and
    /// the driver can both call this without coordinating.
    pub async fn flush<W>(
        &mut self,
        writer: &mut W,
        version: Version,
        connection_type: ConnectionType,
    ) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if self.is_flushed {
            return Ok(());
        }
        let buf = self.render(version, connection_type);
        writer.write_all(&buf).await?;
        writer.flush().await?;
        self.is_flushed = true;
        Ok(())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn rendered(mut r: Response) -> String {
        let mut buf = Vec::new();
        r.flush(&mut buf, Version::Http11, ConnectionType::KeepAlive)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        let s = rendered(r).await;
        assert!(s.starts_with("HTTP/1.1 200 Ok\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[tokio::test]
    async fn custom_header() {
        let r = Response::new(StatusCode::Ok)
            .header("X-Request-Id", "abc-123")
            .body("ok");
        let s = rendered(r).await;
        assert!(s.contains("X-Request-Id: abc-123\r\n"));
    }

    #[tokio::test]
    async fn no_body_no_content_type() {
        let r = Response::new(StatusCode::NoContent);
        let s = rendered(r).await;
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[tokio::test]
    async fn connection_close_is_written_when_requested() {
        let mut r = Response::new(StatusCode::Ok);
        let mut buf = Vec::new();
        r.flush(&mut buf, Version::Http11, ConnectionType::Close)
            .await
            .unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn not_found_helper() {
        let r = Response::not_found();
        let s = rendered(r).await;
        assert!(s.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn flush_is_idempotent() {
        let mut r = Response::new(StatusCode::Ok).body("x");
        let mut buf1 = Vec::new();
        r.flush(&mut buf1, Version::Http11, ConnectionType::KeepAlive)
            .await
            .unwrap();
        let mut buf2 = Vec::new();
        r.flush(&mut buf2, Version::Http11, ConnectionType::KeepAlive)
            .await
            .unwrap();
        assert!(buf2.is_empty());
    }

    #[test]
    fn explicit_status_marks_response_dirty() {
        let r = Response::new(StatusCode::Ok);
        assert!(r.is_dirty());
        assert!(!r.is_flushed());
    }

    #[test]
    fn bare_response_is_not_dirty() {
        let r = Response::bare(StatusCode::NotFound);
        assert!(!r.is_dirty());
        assert!(!r.is_flushed());
    }
}
