//! # strata
//!
//! An onion-model middleware framework for HTTP services.
//!
//! ## The model
//!
//! An [`Application`] is an ordered list of middleware. Every request gets a
//! fresh [`Context`] and walks the list: each middleware runs its code, awaits
//! [`Next::run`] to let everything after it finish, then runs the rest of
//! its code on the way back out.
//!
//! ```text
//!   ─▶ trace ─▶ body parser ─▶ router ─▶ handler
//!   ◀─ trace ◀─ body parser ◀─ router ◀─┘
//! ```
//!
//! Handlers only set a status and a [`Body`]. Once the chain has settled, the
//! context turns that into exactly one response: entity headers are filled
//! in, empty statuses carry no body, `HEAD` writes no bytes. If the chain fails,
//! the error becomes a plain-text response instead, and the error handler
//! hears about it once.
//!
//! What the framework leaves out (left to the proxy in front of it):
//!
//! - **TLS termination**
//! - **Body-size limits** and **rate limiting**
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use strata::{Application, Router, middleware};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> strata::Result<()> {
//!     let router = Router::new()
//!         .get("/users/:id", |ctx| Box::pin(async move {
//!             let id = ctx.request().param("id").unwrap_or("unknown").to_owned();
//!             ctx.set_body(json!({ "id": id, "name": "alice" }));
//!             Ok(())
//!         }))
//!         .post("/users", |ctx| Box::pin(async move {
//!             let Some(input) = ctx.request().body().cloned() else {
//!                 return Err(ctx.throw(400, "expected a JSON body"));
//!             };
//!             ctx.set_status(201)?;
//!             ctx.set("location", "/users/99")?;
//!             ctx.set_body(input);
//!             Ok(())
//!         }));
//!
//!     Application::new()
//!         .use_middleware(middleware::trace())
//!         .use_middleware(middleware::BodyParser::new())
//!         .use_middleware(router)
//!         .listen("0.0.0.0:3000")
//!         .await
//! }
//! ```

mod application;
mod body;
mod compose;
mod config;
mod context;
mod error;
mod fresh;
mod handler;
mod negotiation;
mod request;
mod response;
mod router;
mod server;

pub mod media_type;
pub mod middleware;
pub mod status;

pub use application::{Application, Callback, ErrorHandler};
pub use body::{Body, BodyStream, RequestBody, ResponseBody, request_body};
pub use compose::{Chain, Next, compose};
pub use config::Settings;
pub use context::{Context, Phase, State};
pub use error::{BoxError, Error, Result};
pub use handler::{BoxFuture, BoxedMiddleware, Handler, Middleware};
pub use request::{Peer, Query, Request};
pub use response::Response;
pub use router::Router;
pub use server::Server;
