//! Minimal strata example: JSON endpoints behind the built-in middleware.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/users/42
//!   curl -i http://localhost:3000/old
//!   curl http://localhost:3000/nope

use serde_json::json;
use strata::{Application, Router, middleware};

#[tokio::main]
async fn main() -> strata::Result<()> {
    tracing_subscriber::fmt::init();

    let router = Router::new()
        .get("/users/:id", |ctx| Box::pin(async move {
            let id = ctx.request().param("id").unwrap_or("unknown").to_owned();
            ctx.set_body(json!({ "id": id, "name": "alice" }));
            Ok(())
        }))
        .post("/users", |ctx| Box::pin(async move {
            let name = ctx
                .request()
                .body()
                .and_then(|b| b.get("name"))
                .and_then(|n| n.as_str())
                .map(str::to_owned);
            let Some(name) = name else {
                return Err(ctx.throw(400, "`name` is required"));
            };
            ctx.set_status(201)?;
            ctx.set("location", "/users/99")?;
            ctx.set_body(json!({ "id": "99", "name": name }));
            Ok(())
        }))
        .delete("/users/:id", |ctx| Box::pin(async move { ctx.set_status(204) }))
        .get("/old", |ctx| Box::pin(async move { ctx.redirect("/users/42", None) }));

    Application::new()
        .use_middleware(middleware::trace())
        .use_fn(|ctx, next| Box::pin(async move {
            next.run(ctx).await?;
            ctx.set("x-powered-by", "strata")
        }))
        .use_middleware(middleware::BodyParser::new())
        .use_middleware(router)
        .listen("0.0.0.0:3000")
        .await
}
