//! Per-request context — type-safe state injection and request extensions.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::router::{Captures, FromCaptures};
use crate::Request;

/// Type-erased request extensions map — used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the extensions map
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Get a mutable reference to a value from the extensions map
    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Per-request context — type-safe state injection and request extensions.
pub struct Context {
    request: Request,
    captures: Captures,
    extensions: Extensions,
}

impl Context {
    /// Create a new context from a request, with no path captures.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            captures: Captures::default(),
            extensions: Extensions::new(),
        }
    }

    /// Creates a context carrying the captures produced by a router match.
    pub(crate) fn with_captures(request: Request, captures: Captures) -> Self {
        Self {
            request,
            captures,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the raw path captures from the matched route.
    pub fn raw_captures(&self) -> &Captures {
        &self.captures
    }

    /// Projects the matched route's path captures into `T`.
    ///
    /// `T` is any type implementing [`FromCaptures`] — either a single
    /// value type (via the blanket [`FromCaptureValue`](crate::router::FromCaptureValue)
    /// impl) or a hand-written struct of named fields.
    pub fn captures<T: FromCaptures>(&self) -> T {
        T::from_captures(&self.captures)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let body = self.request.body();
        serde_json::from_slice(body)
    }
}
