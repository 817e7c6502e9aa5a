//! Middleware and handler traits, and their type erasure.
//!
//! # How middleware is stored
//!
//! The application keeps middleware of *different* concrete types in one
//! list, so each is stored as a trait object, `Arc<dyn Middleware>`. Plain
//! closures get there through a blanket impl:
//!
//! ```text
//! |ctx, next| Box::pin(async move { … })          ← user writes this
//!        ↓ app.use_fn(f)
//! impl Middleware for F                           ← blanket impl below
//!        ↓
//! Arc::new(f) as Arc<dyn Middleware>              ← stored in the chain
//!        ↓
//! middleware.call(ctx, next) at request time      ← one vtable dispatch
//! ```
//!
//! Futures are boxed because a trait object cannot name the concrete future
//! type of each implementation. The lifetime `'a` ties the future to the
//! borrowed [`Context`]: a middleware may hold `&mut Context` across
//! `.await` points, including across `next.run(ctx).await`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::compose::Next;
use crate::context::Context;
use crate::error::Result;

/// A heap-allocated, type-erased future borrowing the request context.
///
/// `Send` lets tokio move the request task across worker threads.
pub type BoxFuture<'a, T = Result<()>> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One layer of the onion.
///
/// Code before `next.run(ctx).await` runs on the way in, code after it on the
/// way out. Returning without calling `next` short-circuits the rest of the
/// chain. [`Next`] is consumed when run, so it can be awaited at most once.
///
/// Closures with the matching signature implement this trait:
///
/// ```rust
/// use strata::Application;
///
/// let app = Application::new().use_fn(|ctx, next| {
///     Box::pin(async move {
///         next.run(ctx).await?;
///         ctx.set("x-powered-by", "strata")
///     })
/// });
/// ```
///
/// Stateful middleware implement it on their own type.
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a>;
}

impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        self(ctx, next)
    }
}

/// A shared, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// A terminal request handler: sees the context, never the continuation.
///
/// The router dispatches to handlers; [`Application::use_handler`] mounts one
/// as middleware that continues the chain on its own once the handler is done.
///
/// [`Application::use_handler`]: crate::Application::use_handler
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        self(ctx)
    }
}

pub(crate) type BoxedHandler = Arc<dyn Handler>;

/// Adapts a [`Handler`] to the middleware contract: run it, then continue.
pub(crate) struct Endpoint<H>(pub(crate) H);

impl<H: Handler> Middleware for Endpoint<H> {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            self.0.call(ctx).await?;
            next.run(ctx).await
        })
    }
}
