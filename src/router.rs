//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. The router is itself a
//! middleware: a matched handler runs, then the chain continues; an
//! unmatched request fails with `404`.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;
use tracing::trace;

use crate::compose::Next;
use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, Middleware};

/// Routes `(method, path)` pairs to handlers.
///
/// Paths use `:name` segments for parameters and `*name` for a catch-all
/// tail; `ctx.request().param("name")` reads them back. `HEAD` requests fall
/// back to `GET` routes.
///
/// ```rust
/// use strata::{Application, Router};
///
/// let router = Router::new()
///     .get("/users/:id", |ctx| Box::pin(async move {
///         let id = ctx.request().param("id").unwrap_or_default().to_owned();
///         ctx.set_body(format!("user {id}"));
///         Ok(())
///     }))
///     .delete("/users/:id", |ctx| Box::pin(async move {
///         ctx.set_status(204)
///     }));
///
/// let app = Application::new().use_middleware(router);
/// ```
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

macro_rules! verbs {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers a `", stringify!($method), "` route.")]
            pub fn $name<H>(self, path: &str, handler: H) -> Self
            where
                H: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
            {
                self.on(Method::$method, path, handler)
            }
        )*
    };
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    verbs! {
        get => GET,
        head => HEAD,
        post => POST,
        put => PUT,
        delete => DELETE,
        connect => CONNECT,
        options => OPTIONS,
        trace => TRACE,
        patch => PATCH,
    }

    /// Registers a handler for a method + path pair. Returns `self` for
    /// chaining.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or conflicts with a route already
    /// registered for the same method. Routes are set up once at startup.
    pub fn on<H>(mut self, method: Method, path: &str, handler: H) -> Self
    where
        H: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        let pattern = to_matchit(path);
        self.routes
            .entry(method)
            .or_default()
            .insert(pattern, Arc::new(handler))
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let found = self.find(method, path);
        match found {
            None if method == Method::HEAD => self.find(&Method::GET, path),
            found => found,
        }
    }

    fn find(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        let params = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
        Some((Arc::clone(matched.value), params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Middleware for Router {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            let Some((handler, params)) = self.lookup(ctx.method(), ctx.path()) else {
                trace!(method = %ctx.method(), path = ctx.path(), "no route");
                return Err(Error::status_only(404));
            };
            ctx.request_mut().params = params;
            handler.call(ctx).await?;
            next.run(ctx).await
        })
    }
}

/// `/users/:id/*rest` → `/users/{id}/{*rest}`.
fn to_matchit(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
