//! Request routing — per-method path tries with typed capture projection.
//!
//! Each of the nine standard HTTP methods gets its own trie, plus one more
//! tree keyed by `any` that every method falls back to on a miss. Patterns
//! use three segment kinds:
//!
//! | Segment   | Example pattern              | Example match               |
//! |-----------|-------------------------------|------------------------------|
//! | Literal   | `/users`                      | `/users`                     |
//! | Param     | `/users/:id`                  | `/users/42` → `id = "42"`    |
//! | Wildcard  | `/files/*`                    | `/files/a/b` → `* = "a/b"`   |
//!
//! At each level of a lookup a literal match is preferred over a param
//! match, which is preferred over a wildcard match; the wildcard, if taken,
//! consumes the rest of the path (including interior `/`s) and ends the
//! walk. Construction is eager (tries are built once, up front, and are
//! read-only afterward) rather than relying on compile-time reflection —
//! see `DESIGN.md` for why.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::context::Context;
use crate::{Method, Request, Response, StatusCode};

/// Maximum number of `:param` segments allowed in a single route pattern.
const MAX_PARAMS: usize = 10;

/// Errors raised while registering a route.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("route pattern declares more than {MAX_PARAMS} params")]
    TooManyParams,
    #[error("wildcard segment `*` must be the last segment in the pattern")]
    WildcardNotTerminal,
}

/// Type-erased, heap-allocated async handler that processes a [`Context`]
/// and returns a [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and
/// shared across threads without copying the underlying closure. You never
/// construct this type directly — use [`Router::get`], [`Router::post`],
/// and the other method-specific helpers instead.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the
/// blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

/// A single path segment parsed out of a registered route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

fn parse_segments(pattern: &str) -> Result<Vec<Segment>, RouterError> {
    let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(parts.len());
    let mut param_count = 0;

    for (i, part) in parts.iter().enumerate() {
        if let Some(name) = part.strip_prefix(':') {
            param_count += 1;
            if param_count > MAX_PARAMS {
                return Err(RouterError::TooManyParams);
            }
            segments.push(Segment::Param(name.to_string()));
        } else if *part == "*" {
            if i != parts.len() - 1 {
                return Err(RouterError::WildcardNotTerminal);
            }
            segments.push(Segment::Wildcard);
        } else {
            segments.push(Segment::Literal(part.to_string()));
        }
    }

    Ok(segments)
}

/// A node's matching kind, mirroring the three `Segment` kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Label {
    Literal(String),
    Param(String),
    Wildcard,
}

/// One node of a per-method path trie.
#[derive(Debug, Default)]
struct Node {
    label_slot: Option<Label>,
    // index into `Router::routes`, set only on the node where a route terminates.
    data: Option<usize>,
    children: Vec<Node>,
}

impl Node {
    fn root() -> Self {
        Self::default()
    }

    fn leaf(label: Label) -> Self {
        Self {
            label_slot: Some(label),
            data: None,
            children: Vec::new(),
        }
    }

    fn same_slot(label: &Label, segment: &Segment) -> bool {
        matches!(
            (label, segment),
            (Label::Literal(a), Segment::Literal(b)) if a == b
        ) || matches!((label, segment), (Label::Param(_), Segment::Param(_)))
            || matches!((label, segment), (Label::Wildcard, Segment::Wildcard))
    }

    fn child_for(&mut self, segment: &Segment) -> &mut Node {
        let existing = self
            .children
            .iter()
            .position(|c| matches!(&c.label_slot, Some(l) if Self::same_slot(l, segment)));
        if let Some(idx) = existing {
            return &mut self.children[idx];
        }
        let label = match segment {
            Segment::Literal(s) => Label::Literal(s.clone()),
            Segment::Param(name) => Label::Param(name.clone()),
            Segment::Wildcard => Label::Wildcard,
        };
        self.children.push(Node::leaf(label));
        self.children.last_mut().unwrap()
    }

    fn insert(&mut self, segments: &[Segment], route_index: usize) {
        match segments.split_first() {
            None => self.data = Some(route_index),
            Some((segment, rest)) => self.child_for(segment).insert(rest, route_index),
        }
    }

    // Walks `segments`, recording captures along the way, and returns the
    // terminal route index if one exists. No backtracking across levels:
    // the first matching kind (literal, then param, then wildcard) at each
    // level is committed to.
    fn lookup(&self, segments: &[&str], captures: &mut Vec<(String, String)>) -> Option<usize> {
        let Some((segment, rest)) = segments.split_first() else {
            return self.data;
        };

        if let Some(child) = self.children.iter().find(
            |c| matches!(&c.label_slot, Some(Label::Literal(l)) if l == segment),
        ) {
            return child.lookup(rest, captures);
        }

        if let Some(child) = self
            .children
            .iter()
            .find(|c| matches!(&c.label_slot, Some(Label::Param(_))))
        {
            let Some(Label::Param(name)) = &child.label_slot else {
                unreachable!()
            };
            captures.push((name.clone(), (*segment).to_string()));
            return child.lookup(rest, captures);
        }

        if let Some(child) = self
            .children
            .iter()
            .find(|c| matches!(&c.label_slot, Some(Label::Wildcard)))
        {
            if let Some(idx) = child.data {
                captures.push(("*".to_string(), segments.join("/")));
                return Some(idx);
            }
        }

        None
    }
}

/// The path parameters captured while walking a router trie, in the order
/// the path segments appeared. The wildcard remainder, if any, is stored
/// under the key `"*"`.
#[derive(Debug, Clone, Default)]
pub struct Captures {
    values: Vec<(String, String)>,
}

impl Captures {
    /// Returns the captured value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first captured value, regardless of name — used to
    /// project a route's single declared capture type.
    pub fn first(&self) -> Option<&str> {
        self.values.first().map(|(_, v)| v.as_str())
    }

    /// Returns `true` if no path parameters were captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Projects a single captured value into a concrete field type.
///
/// `bytes`/`Option<bytes>` capture types take the value verbatim (empty or
/// `None` if absent); integer types parse base-10 and clamp to `0` on
/// failure; `Option<integer>` is `None` on failure. Any type that doesn't
/// implement this trait cannot be used as a capture field — a compile-time
/// error, not the construction-time check a reflective language would need.
pub trait FromCaptureValue: Sized {
    fn from_capture(value: Option<&str>) -> Self;
}

impl FromCaptureValue for String {
    fn from_capture(value: Option<&str>) -> Self {
        value.unwrap_or_default().to_string()
    }
}

impl FromCaptureValue for Option<String> {
    fn from_capture(value: Option<&str>) -> Self {
        value.map(str::to_string)
    }
}

impl FromCaptureValue for bytes::Bytes {
    fn from_capture(value: Option<&str>) -> Self {
        bytes::Bytes::copy_from_slice(value.unwrap_or_default().as_bytes())
    }
}

impl FromCaptureValue for Option<bytes::Bytes> {
    fn from_capture(value: Option<&str>) -> Self {
        value.map(|s| bytes::Bytes::copy_from_slice(s.as_bytes()))
    }
}

macro_rules! impl_integer_capture {
    ($($t:ty),* $(,)?) => {
        $(
            impl FromCaptureValue for $t {
                fn from_capture(value: Option<&str>) -> Self {
                    value.and_then(|s| s.parse().ok()).unwrap_or(0)
                }
            }

            impl FromCaptureValue for Option<$t> {
                fn from_capture(value: Option<&str>) -> Self {
                    value.and_then(|s| s.parse().ok())
                }
            }
        )*
    };
}

impl_integer_capture!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

/// Projects an entire [`Captures`] set into a route's declared capture
/// type: either a single value (via the blanket impl over
/// [`FromCaptureValue`], projecting the route's first captured param) or a
/// hand-written struct of named fields, each resolved with
/// [`FromCaptureValue::from_capture`] looked up by field name.
///
/// # Examples
///
/// ```
/// use rttp::router::{Captures, FromCaptureValue, FromCaptures};
///
/// struct PostMessage {
///     post: i64,
///     message: String,
/// }
///
/// impl FromCaptures for PostMessage {
///     fn from_captures(captures: &Captures) -> Self {
///         Self {
///             post: i64::from_capture(captures.get("post")),
///             message: String::from_capture(captures.get("message")),
///         }
///     }
/// }
/// ```
pub trait FromCaptures: Sized {
    fn from_captures(captures: &Captures) -> Self;
}

impl<T: FromCaptureValue> FromCaptures for T {
    fn from_captures(captures: &Captures) -> Self {
        T::from_capture(captures.first())
    }
}

/// HTTP request router: one path trie per standard method, plus an `any`
/// fallback tree every method consults on a miss.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp::{Router, Response, StatusCode};
///
/// let mut router = Router::new();
///
/// router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) }).unwrap();
///
/// router.get("/users/:id", |ctx| async move {
///     let id = ctx.raw_captures().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// }).unwrap();
/// ```
pub struct Router {
    get: Node,
    head: Node,
    post: Node,
    put: Node,
    delete: Node,
    connect: Node,
    options: Node,
    trace: Node,
    patch: Node,
    any: Node,
    routes: Vec<Handler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self {
            get: Node::root(),
            head: Node::root(),
            post: Node::root(),
            put: Node::root(),
            delete: Node::root(),
            connect: Node::root(),
            options: Node::root(),
            trace: Node::root(),
            patch: Node::root(),
            any: Node::root(),
            routes: Vec::new(),
        }
    }

    fn tree_for(&self, method: &Method) -> Option<&Node> {
        Some(match method {
            Method::Get => &self.get,
            Method::Head => &self.head,
            Method::Post => &self.post,
            Method::Put => &self.put,
            Method::Delete => &self.delete,
            Method::Connect => &self.connect,
            Method::Options => &self.options,
            Method::Trace => &self.trace,
            Method::Patch => &self.patch,
            Method::Any(_) => return None,
        })
    }

    fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl IntoHandler,
    ) -> Result<(), RouterError> {
        let segments = parse_segments(pattern)?;
        let index = self.routes.len();
        self.routes.push(Arc::new(move |ctx| handler.call(ctx)));
        let tree = match method {
            Method::Get => &mut self.get,
            Method::Head => &mut self.head,
            Method::Post => &mut self.post,
            Method::Put => &mut self.put,
            Method::Delete => &mut self.delete,
            Method::Connect => &mut self.connect,
            Method::Options => &mut self.options,
            Method::Trace => &mut self.trace,
            Method::Patch => &mut self.patch,
            Method::Any(_) => &mut self.any,
        };
        tree.insert(&segments, index);
        Ok(())
    }

    /// Registers a handler for `GET` requests matching `pattern`.
    pub fn get(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Get, pattern, handler)
    }

    /// Registers a handler for `HEAD` requests matching `pattern`.
    pub fn head(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Head, pattern, handler)
    }

    /// Registers a handler for `POST` requests matching `pattern`.
    pub fn post(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Post, pattern, handler)
    }

    /// Registers a handler for `PUT` requests matching `pattern`.
    pub fn put(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Put, pattern, handler)
    }

    /// Registers a handler for `DELETE` requests matching `pattern`.
    pub fn delete(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Delete, pattern, handler)
    }

    /// Registers a handler for `CONNECT` requests matching `pattern`.
    pub fn connect(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Connect, pattern, handler)
    }

    /// Registers a handler for `TRACE` requests matching `pattern`.
    pub fn trace(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Trace, pattern, handler)
    }

    /// Registers a handler for `OPTIONS` requests matching `pattern`.
    pub fn options(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Options, pattern, handler)
    }

    /// Registers a handler for `PATCH` requests matching `pattern`.
    pub fn patch(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        self.register(Method::Patch, pattern, handler)
    }

    /// Registers a handler in the `any`-method fallback tree, matched when
    /// no method-specific route matches `pattern`.
    pub fn any(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        let segments = parse_segments(pattern)?;
        let index = self.routes.len();
        self.routes.push(Arc::new(move |ctx| handler.call(ctx)));
        self.any.insert(&segments, index);
        Ok(())
    }

    /// Returns the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` to the matching route's handler.
    ///
    /// Looks the request path up in the method-specific tree first, falling
    /// back once to the `any` tree on a miss. Returns a bare
    /// `404 Not Found` if neither tree has a match — the router's own
    /// miss response, distinct from the connection driver's
    /// handler-returned-nothing synthesis (see [`Response::not_found`]).
    pub async fn route(&self, request: Request) -> Response {
        let path = request.path();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut captures = Vec::new();
        let method = request.method().clone();
        let index = self
            .tree_for(&method)
            .and_then(|tree| tree.lookup(&segments, &mut captures))
            .or_else(|| {
                captures.clear();
                self.any.lookup(&segments, &mut captures)
            });

        match index {
            Some(i) => {
                let handler = self.routes[i].clone();
                let ctx = Context::with_captures(request, Captures { values: captures });
                handler(ctx).await
            }
            None => Response::bare(StatusCode::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::ScratchBuffer;

    async fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let mut reader = tokio::io::BufReader::new(raw.as_bytes());
        let scratch = ScratchBuffer::new(crate::http::parser::DEFAULT_HEADER_BUFFER_SIZE);
        Request::parse(&scratch, &mut reader).await.unwrap()
    }

    #[test]
    fn parse_segments_classifies_kinds() {
        let segments = parse_segments("/users/:id/files/*").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("users".into()),
                Segment::Param("id".into()),
                Segment::Literal("files".into()),
                Segment::Wildcard,
            ]
        );
    }

    #[test]
    fn wildcard_must_be_terminal() {
        let err = parse_segments("/files/*/extra").unwrap_err();
        assert_eq!(err, RouterError::WildcardNotTerminal);
    }

    #[test]
    fn too_many_params_is_rejected() {
        let pattern = (0..11)
            .map(|i| format!(":p{i}"))
            .collect::<Vec<_>>()
            .join("/");
        let err = parse_segments(&format!("/{pattern}")).unwrap_err();
        assert_eq!(err, RouterError::TooManyParams);
    }

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[tokio::test]
    async fn router_empty_returns_404() {
        let router = Router::new();
        let res = router.route(make_request("GET", "/").await).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn literal_route_matches() {
        let mut router = Router::new();
        router
            .get("/hello", |_ctx| async { Response::new(StatusCode::Ok) })
            .unwrap();
        let res = router.route(make_request("GET", "/hello").await).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn method_mismatch_returns_404() {
        let mut router = Router::new();
        router
            .get("/hello", |_ctx| async { Response::new(StatusCode::Ok) })
            .unwrap();
        let res = router.route(make_request("POST", "/hello").await).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn param_route_captures_value_and_rejects_wrong_arity() {
        let mut router = Router::new();
        router
            .get("/hello/:name", |ctx| async move {
                let name = ctx.raw_captures().get("name").unwrap_or("").to_owned();
                Response::new(StatusCode::Ok).body(name)
            })
            .unwrap();

        let res = router.route(make_request("GET", "/hello/x").await).await;
        assert_eq!(res.status(), StatusCode::Ok);

        assert_eq!(
            router
                .route(make_request("GET", "/hello/").await)
                .await
                .status(),
            StatusCode::NotFound
        );
        assert_eq!(
            router
                .route(make_request("GET", "/hello/x/y").await)
                .await
                .status(),
            StatusCode::NotFound
        );
    }

    #[tokio::test]
    async fn wildcard_route_captures_remainder() {
        let mut router = Router::new();
        router
            .get("/files/*", |ctx| async move {
                let rest = ctx.raw_captures().get("*").unwrap_or("").to_owned();
                Response::new(StatusCode::Ok).body(rest)
            })
            .unwrap();
        let res = router
            .route(make_request("GET", "/files/a/b/c").await)
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn literal_is_preferred_over_param_at_same_level() {
        let mut router = Router::new();
        router
            .get("/users/me", |_ctx| async { Response::new(StatusCode::Created) })
            .unwrap();
        router
            .get("/users/:id", |_ctx| async { Response::new(StatusCode::Ok) })
            .unwrap();

        assert_eq!(
            router
                .route(make_request("GET", "/users/me").await)
                .await
                .status(),
            StatusCode::Created
        );
        assert_eq!(
            router
                .route(make_request("GET", "/users/42").await)
                .await
                .status(),
            StatusCode::Ok
        );
    }

    #[tokio::test]
    async fn method_specific_route_shadows_any_fallback() {
        let mut router = Router::new();
        router
            .any("/shared", |_ctx| async { Response::new(StatusCode::Accepted) })
            .unwrap();
        router
            .get("/shared", |_ctx| async { Response::new(StatusCode::Ok) })
            .unwrap();

        assert_eq!(
            router
                .route(make_request("GET", "/shared").await)
                .await
                .status(),
            StatusCode::Ok
        );
        assert_eq!(
            router
                .route(make_request("DELETE", "/shared").await)
                .await
                .status(),
            StatusCode::Accepted
        );
    }

    #[tokio::test]
    async fn struct_capture_projects_typed_fields() {
        struct PostMessage {
            post: i64,
            message: String,
        }

        impl FromCaptures for PostMessage {
            fn from_captures(captures: &Captures) -> Self {
                Self {
                    post: i64::from_capture(captures.get("post")),
                    message: String::from_capture(captures.get("message")),
                }
            }
        }

        let mut router = Router::new();
        router
            .get("/posts/:post/messages/:message", |ctx| async move {
                let c: PostMessage = ctx.captures();
                Response::new(StatusCode::Ok).body(format!("{}:{}", c.post, c.message))
            })
            .unwrap();

        let res = router
            .route(make_request("GET", "/posts/42/messages/hi").await)
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
    }
}
