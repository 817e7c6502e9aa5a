//! The onion: composing middleware into one entry point.
//!
//! ```text
//!   request ──▶ m0 ──▶ m1 ──▶ m2 ──▶ (terminal: done)
//!   finished ◀── m0 ◀── m1 ◀── m2 ◀──┘
//! ```
//!
//! [`compose`] freezes a list of middleware into a [`Chain`]. Running the
//! chain calls `m0` with a [`Next`] pointing at `m1`, and so on; the
//! continuation past the last middleware resolves immediately. Errors
//! travel back out through every `next.run(ctx).await?` until some layer
//! handles them or they reach the application.

use std::sync::Arc;

use tracing::trace;

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedMiddleware};

/// The rest of the chain, as seen from one middleware.
///
/// `run` takes `self` by value, so a continuation cannot be invoked twice:
///
/// ```rust,compile_fail
/// use strata::Application;
///
/// Application::new().use_fn(|ctx, next| {
///     Box::pin(async move {
///         next.run(ctx).await?;
///         next.run(ctx).await // error: use of moved value `next`
///     })
/// });
/// ```
#[must_use = "a middleware that drops `Next` short-circuits the chain"]
pub struct Next<'a> {
    rest: &'a [BoxedMiddleware],
}

impl<'a> Next<'a> {
    /// Runs every downstream middleware and resolves once all of them,
    /// including their post-`next` code, have finished.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b>
    where
        'a: 'b,
    {
        match self.rest.split_first() {
            Some((head, rest)) => {
                trace!(remaining = rest.len(), "entering middleware");
                head.call(ctx, Next { rest })
            }
            None => Box::pin(std::future::ready(Ok(()))),
        }
    }

    /// Number of middleware still ahead.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

/// A frozen middleware list with a single entry point.
///
/// Cloning is cheap and shares the list. Middleware registered on the
/// application after the chain was built are not part of it.
#[derive(Clone)]
pub struct Chain {
    middleware: Arc<[BoxedMiddleware]>,
}

impl Chain {
    /// Runs the whole chain against `ctx`.
    pub fn run<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Next { rest: &self.middleware }.run(ctx)
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }
}

/// Builds a [`Chain`] from middleware in execution order.
pub fn compose(middleware: impl IntoIterator<Item = BoxedMiddleware>) -> Chain {
    Chain { middleware: middleware.into_iter().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::request_body;
    use crate::request::Peer;
    use crate::{Application, Settings};
    use bytes::Bytes;

    fn boxed<F>(f: F) -> BoxedMiddleware
    where
        F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn context() -> Context {
        let req = http::Request::new(request_body(Bytes::new()));
        Application::new().settings(Settings::default()).create_context(req, Peer::default())
    }

    #[tokio::test]
    async fn empty_chain_completes_immediately() {
        let mut ctx = context();
        compose(Vec::new()).run(&mut ctx).await.unwrap();
        assert_eq!(ctx.status(), 404);
    }

    #[tokio::test]
    async fn next_knows_what_is_left() {
        let seen: BoxedMiddleware = boxed(|ctx, next| {
            let left = next.remaining();
            Box::pin(async move {
                ctx.state_mut().insert("left", left);
                next.run(ctx).await
            })
        });
        let noop: BoxedMiddleware = boxed(|ctx, next| next.run(ctx));
        let chain = compose([Arc::clone(&seen), noop, seen]);
        assert_eq!(chain.len(), 3);

        let mut ctx = context();
        chain.run(&mut ctx).await.unwrap();
        // The last middleware overwrote the value written by the first.
        assert_eq!(ctx.state().get("left"), Some(&serde_json::json!(0)));
    }

    #[tokio::test]
    async fn errors_short_circuit_the_way_out() {
        let fail: BoxedMiddleware = boxed(|ctx, _next| {
            let err = ctx.throw(409, "conflict");
            Box::pin(async move { Err(err) })
        });
        let after: BoxedMiddleware = boxed(|ctx, next| {
            Box::pin(async move {
                next.run(ctx).await?;
                ctx.set_body("unreachable");
                Ok(())
            })
        });
        let mut ctx = context();
        let err = compose([after, fail]).run(&mut ctx).await.unwrap_err();
        assert_eq!(err.status(), 409);
        assert!(ctx.body().is_empty());
    }
}
