//! HTTP/1.1 protocol types, parsing, and serialization.
//!
//! This module provides the core HTTP primitives: [`Method`], [`Version`],
//! [`StatusCode`], [`Headers`], [`Request`], and [`Response`], plus the
//! request parser (`parser`) and form-body iteration (`form`).

use std::fmt;

pub mod form;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// An HTTP response status code.
///
/// Reason phrases are pinned exactly as the wire protocol requires them —
/// including non-standard casing such as `"Ok"` for 200 — and must be
/// emitted verbatim.
///
/// # Examples
///
/// ```
/// use rttp::http::StatusCode;
///
/// let status = StatusCode::Ok;
/// assert_eq!(status.as_u16(), 200);
/// assert_eq!(status.canonical_reason(), "Ok");
/// assert!(status.is_success());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    // 1xx Informational
    Continue = 100,
    SwitchingProtocols = 101,

    // 2xx Success
    Ok = 200,
    Created = 201,
    Accepted = 202,
    NonAuthoritativeInformation = 203,
    NoContent = 204,
    ResetContent = 205,
    PartialContent = 206,

    // 3xx Redirection
    MultipleChoices = 300,
    MovedPermanently = 301,
    Found = 302,
    SeeOther = 303,
    NotModified = 304,
    UseProxy = 305,
    TemporaryRedirect = 307,

    // 4xx Client Error
    BadRequest = 400,
    Unauthorized = 401,
    PaymentRequired = 402,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    NotAcceptable = 406,
    ProxyAuthenticationRequired = 407,
    RequestTimeout = 408,
    Conflict = 409,
    Gone = 410,
    LengthRequired = 411,
    PreconditionFailed = 412,
    RequestEntityTooLarge = 413,
    RequestUriTooLong = 414,
    UnsupportedMediaType = 415,
    RequestedRangeNotSatisfiable = 416,
    ExpectationFailed = 417,
    ImATeapot = 418,
    UpgradeRequired = 426,
    RequestHeaderFieldsTooLarge = 431,

    // 5xx Server Error
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
    HttpVersionNotSupported = 505,
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the canonical reason phrase for this status code, pinned
    /// exactly as the wire protocol requires it.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Continue => "Continue",
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "Ok",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NonAuthoritativeInformation => "Non Authoritative Information",
            Self::NoContent => "No Content",
            Self::ResetContent => "Reset Content",
            Self::PartialContent => "Partial Content",
            Self::MultipleChoices => "Multiple Choices",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::SeeOther => "See Other",
            Self::NotModified => "Not Modified",
            Self::UseProxy => "Use Proxy",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::PaymentRequired => "Payment Required",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::ProxyAuthenticationRequired => "Proxy Authentication Required",
            Self::RequestTimeout => "Request Timeout",
            Self::Conflict => "Conflict",
            Self::Gone => "Gone",
            Self::LengthRequired => "Length Required",
            Self::PreconditionFailed => "Precondition Failed",
            Self::RequestEntityTooLarge => "Request Entity Too Large",
            Self::RequestUriTooLong => "Request-URI Too Long",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::RequestedRangeNotSatisfiable => "Requested Range Not Satisfiable",
            Self::ExpectationFailed => "Expectation Failed",
            Self::ImATeapot => "I'm a Teapot",
            Self::UpgradeRequired => "Upgrade Required",
            Self::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
            Self::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Returns `true` for 2xx status codes.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// Returns `true` for 4xx and 5xx status codes.
    pub fn is_error(self) -> bool {
        self.as_u16() >= 400
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Standard methods are unit variants for zero-cost comparison. Any token
/// that doesn't match one of the nine standard methods parses to
/// [`Method::Any`], which carries the original token and is the variant the
/// router's method-agnostic fallback tree matches against.
///
/// # Examples
///
/// ```
/// use rttp::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
///
/// let custom: Method = "PROPFIND".parse().unwrap();
/// assert_eq!(custom, Method::Any("PROPFIND".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    /// Any method token not recognized as one of the nine standard methods.
    /// Matches only the router's method-agnostic fallback tree.
    Any(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
            Self::Any(s) => s.as_str(),
        }
    }

    /// Returns `true` if this method is considered "safe" (no side effects,
    /// RFC 9110 §9.2.1): GET, HEAD, OPTIONS, TRACE.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options | Self::Trace)
    }

    /// Returns `true` if this method is idempotent (RFC 9110 §9.2.2).
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Self::Get | Self::Head | Self::Put | Self::Delete | Self::Options | Self::Trace
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    /// Parses a method token case-sensitively. Any token that isn't exactly
    /// one of the nine canonical uppercase tokens resolves to `Any`, mirroring
    /// the source library's `Method.fromString`, which keeps the router's
    /// `any` fallback working for unrecognized methods.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "CONNECT" => Self::Connect,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            "PATCH" => Self::Patch,
            other => Self::Any(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// HTTP protocol version.
///
/// Unrecognized tokens default to `Http11` per spec. `Http20` is parsed for
/// completeness but is never produced by the connection driver — HTTP/2 is
/// out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http09,
    Http10,
    Http11,
    Http20,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http09 => "HTTP/0.9",
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
            Self::Http20 => "HTTP/2.0",
        }
    }

    /// Returns `true` for HTTP/1.1, where keep-alive is the default and a
    /// `Host` header is mandatory.
    pub fn is_1_1(self) -> bool {
        matches!(self, Self::Http11)
    }
}

impl std::str::FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "HTTP/0.9" => Self::Http09,
            "HTTP/1.0" => Self::Http10,
            "HTTP/1.1" => Self::Http11,
            "HTTP/2.0" => Self::Http20,
            _ => Self::Http11,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the connection should be reused for another request/response
/// cycle after the current one completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    KeepAlive,
    Close,
}

impl ConnectionType {
    /// The default for a given protocol version absent a `Connection` header:
    /// keep-alive for HTTP/1.1, close otherwise.
    pub fn default_for(version: Version) -> Self {
        if version.is_1_1() {
            Self::KeepAlive
        } else {
            Self::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_reason_phrases_are_pinned() {
        assert_eq!(StatusCode::Ok.canonical_reason(), "Ok");
        assert_eq!(
            StatusCode::RequestEntityTooLarge.canonical_reason(),
            "Request Entity Too Large"
        );
        assert_eq!(
            StatusCode::RequestUriTooLong.canonical_reason(),
            "Request-URI Too Long"
        );
        assert_eq!(StatusCode::ImATeapot.canonical_reason(), "I'm a Teapot");
    }

    #[test]
    fn unrecognized_method_is_any() {
        let method: Method = "PROPFIND".parse().unwrap();
        assert_eq!(method, Method::Any("PROPFIND".to_string()));
    }

    #[test]
    fn method_parse_is_case_sensitive() {
        let method: Method = "get".parse().unwrap();
        assert_eq!(method, Method::Any("get".to_string()));
    }

    #[test]
    fn version_defaults_to_http11() {
        let version: Version = "garbage".parse().unwrap();
        assert_eq!(version, Version::Http11);
    }

    #[test]
    fn connection_type_defaults() {
        assert_eq!(
            ConnectionType::default_for(Version::Http11),
            ConnectionType::KeepAlive
        );
        assert_eq!(
            ConnectionType::default_for(Version::Http10),
            ConnectionType::Close
        );
    }
}
