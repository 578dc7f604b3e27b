//! Security-related middleware (currently CORS).

pub mod middleware;

pub use middleware::CorsMiddleware;
