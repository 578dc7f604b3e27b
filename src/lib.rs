//! # rttp
//!
//! A from-scratch async HTTP/1.1 server framework written in Rust.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rttp::server::Server;
//! use rttp::http::{Request, Response, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Listening on http://127.0.0.1:8080");
//!     server.run(|_req: Request| async {
//!         Response::new(StatusCode::Ok).body("Hello, World!")
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;
pub mod uri;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
