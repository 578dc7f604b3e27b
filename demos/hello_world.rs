//! Minimal rttp server: a router with a couple of routes, served directly.

use rttp::http::{Response, StatusCode};
use rttp::{Context, Router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut router = Router::new();
    router.get("/", |_ctx: Context| async {
        Response::new(StatusCode::Ok).body("Hello, World!")
    })?;
    router.get("/users/:id", |ctx: Context| async move {
        let id = ctx.raw_captures().get("id").unwrap_or("unknown").to_owned();
        Response::new(StatusCode::Ok).body(format!("user {id}"))
    })?;

    let server = rttp::Server::bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", server.local_addr());

    let router = std::sync::Arc::new(router);
    server
        .run(move |req| {
            let router = router.clone();
            async move { router.route(req).await }
        })
        .await?;

    Ok(())
}
