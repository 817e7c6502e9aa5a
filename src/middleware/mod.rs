//! Middleware shipped with the crate.
//!
//! - [`BodyParser`] reads JSON, form, multipart and text request bodies into
//!   `ctx.request().body()`.
//! - [`Render`] installs a template engine for
//!   [`Context::render`](crate::Context::render).
//! - [`trace()`] logs one `tracing` event per request with method, path,
//!   status and latency.
//!
//! All are ordinary [`Middleware`](crate::Middleware), mounted with
//! [`Application::use_middleware`](crate::Application::use_middleware).

mod body_parser;
mod render;
mod trace;

pub use body_parser::BodyParser;
pub use render::Render;
pub(crate) use render::Renderer;
pub use trace::{Trace, trace};
