//! The application: settings, the middleware list and per-request dispatch.
//!
//! ```rust,no_run
//! use strata::Application;
//!
//! #[tokio::main]
//! async fn main() -> strata::Result<()> {
//!     Application::new()
//!         .use_handler(|ctx| Box::pin(async move {
//!             ctx.set_body("hello");
//!             Ok(())
//!         }))
//!         .listen("127.0.0.1:3000")
//!         .await
//! }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::body::{RequestBody, ResponseBody};
use crate::compose::{Chain, Next, compose};
use crate::config::Settings;
use crate::context::{Context, Outlet, Phase, Signal};
use crate::error::{Error, Result};
use crate::handler::{BoxFuture, BoxedMiddleware, Endpoint, Middleware};
use crate::request::{Peer, Request};
use crate::server::Server;

/// Observer for errors that end a request or happen after it was answered.
///
/// The context is present for errors raised by the middleware chain and
/// absent for transport and streaming failures.
pub type ErrorHandler = Arc<dyn Fn(&Error, Option<&Context>) + Send + Sync>;

/// What every request of one [`Callback`] shares.
pub(crate) struct Shared {
    pub(crate) settings: Arc<Settings>,
    pub(crate) state: Arc<HashMap<String, Value>>,
    on_error: Option<ErrorHandler>,
}

impl Shared {
    pub(crate) fn report(&self, err: &Error, ctx: Option<&Context>) {
        match &self.on_error {
            Some(handler) => handler(err, ctx),
            None => log_error(&self.settings, err, ctx),
        }
    }

    pub(crate) fn inspect(&self) -> Value {
        serde_json::to_value(&*self.settings).unwrap_or_default()
    }
}

/// Whether the default handler writes `err` to the log.
///
/// Not-found and exposed errors are expected traffic; a silent application
/// logs nothing.
pub(crate) fn is_logged(settings: &Settings, err: &Error) -> bool {
    !(settings.silent || err.status() == 404 || err.expose())
}

fn log_error(settings: &Settings, err: &Error, ctx: Option<&Context>) {
    if !is_logged(settings, err) {
        return;
    }
    match ctx {
        Some(ctx) => error!(
            method = %ctx.method(),
            path = ctx.path(),
            status = err.status(),
            error = %err,
            "request failed"
        ),
        None => error!(status = err.status(), error = %err, "request failed"),
    }
}

/// An HTTP application: an ordered middleware list plus settings.
///
/// Built once at startup with chained calls. [`callback`](Self::callback)
/// freezes the current list into a request handler.
pub struct Application {
    settings: Settings,
    middleware: Vec<BoxedMiddleware>,
    state: HashMap<String, Value>,
    on_error: Option<ErrorHandler>,
}

impl Application {
    /// An empty application configured from the environment.
    pub fn new() -> Self {
        Self {
            settings: Settings::from_env(),
            middleware: Vec::new(),
            state: HashMap::new(),
            on_error: None,
        }
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Trust `X-Forwarded-*` headers.
    pub fn proxy(mut self, proxy: bool) -> Self {
        self.settings.proxy = proxy;
        self
    }

    pub fn subdomain_offset(mut self, offset: usize) -> Self {
        self.settings.subdomain_offset = offset;
        self
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.settings.env = env.into();
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.settings.silent = silent;
        self
    }

    /// Default value of `ctx.state()[key]` for every request.
    pub fn state(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state.insert(key.into(), value.into());
        self
    }

    /// Current settings.
    pub fn config(&self) -> &Settings {
        &self.settings
    }

    // ── Middleware ───────────────────────────────────────────────────────────

    /// Appends middleware to the end of the chain.
    pub fn use_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Appends a closure middleware, `|ctx, next| Box::pin(async move { … })`.
    pub fn use_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.use_middleware(f)
    }

    /// Appends a handler that does not see the continuation; the chain
    /// continues once it returns `Ok`.
    pub fn use_handler<H>(self, handler: H) -> Self
    where
        H: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
    {
        self.use_middleware(Endpoint(handler))
    }

    /// Replaces the default error log with `handler`.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error, Option<&Context>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    // ── Serving ──────────────────────────────────────────────────────────────

    fn shared(&self) -> Arc<Shared> {
        Arc::new(Shared {
            settings: Arc::new(self.settings.clone()),
            state: Arc::new(self.state.clone()),
            on_error: self.on_error.clone(),
        })
    }

    /// Snapshots the middleware list into a request handler.
    ///
    /// Middleware added afterwards only reach callbacks created later.
    pub fn callback(&self) -> Callback {
        debug!(middleware = self.middleware.len(), "composing middleware chain");
        Callback {
            app: self.shared(),
            chain: compose(self.middleware.iter().cloned()),
        }
    }

    /// A context for `req` that is not attached to any connection.
    ///
    /// Useful for driving middleware by hand; whatever it delivers is dropped.
    pub fn create_context(&self, req: http::Request<RequestBody>, peer: Peer) -> Context {
        let app = self.shared();
        let request = Request::new(req, peer, Arc::clone(&app.settings));
        Context::new(request, app, Outlet::detached())
    }

    /// Binds `addr` and serves until SIGTERM or Ctrl-C.
    pub async fn listen(&self, addr: &str) -> Result<()> {
        let addr: SocketAddr = addr.parse().map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
        Server::bind(addr).serve(self.callback()).await
    }

    /// Public settings as JSON.
    pub fn inspect(&self) -> Value {
        serde_json::to_value(&self.settings).unwrap_or_else(|_| json!({}))
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

/// A frozen application, ready to answer requests. Cheap to clone.
#[derive(Clone)]
pub struct Callback {
    app: Arc<Shared>,
    chain: Chain,
}

impl Callback {
    /// Runs one request through the chain.
    ///
    /// The chain runs on its own task. If this future is dropped before a
    /// response is ready (the client went away), the request is marked as
    /// errored and the chain still runs to completion.
    ///
    /// Returns `None` when no response was produced, e.g. after
    /// [`Context::set_respond(false)`](Context::set_respond) without a manual
    /// response. A panicking middleware fails the chain with
    /// [`Error::Panic`] and is answered with a 500.
    pub async fn handle(&self, req: http::Request<RequestBody>, peer: Peer) -> Option<http::Response<ResponseBody>> {
        let (tx, rx) = oneshot::channel();
        let signal = Arc::new(Signal::default());
        let guard = DisconnectGuard(Some(Arc::clone(&signal)));

        tokio::spawn(self.clone().process(req, peer, Outlet::new(tx, Arc::clone(&signal)), signal));

        let res = rx.await.ok();
        guard.disarm();
        res
    }

    async fn process(self, req: http::Request<RequestBody>, peer: Peer, outlet: Outlet, signal: Arc<Signal>) {
        let request = Request::new(req, peer, Arc::clone(&self.app.settings));
        let mut ctx = Context::new(request, Arc::clone(&self.app), outlet);
        ctx.enter(Phase::Dispatched);

        let mut closed = false;
        let result = {
            let mut run = AssertUnwindSafe(self.chain.run(&mut ctx)).catch_unwind();
            loop {
                tokio::select! {
                    biased;

                    () = signal.closed(), if !closed => {
                        closed = true;
                        self.app.report(&Error::ConnectionClosed, None);
                    }
                    res = &mut run => break res.unwrap_or_else(|payload| Err(Error::from_panic(payload))),
                }
            }
        };

        if closed {
            ctx.enter(Phase::Errored);
            debug!(result = ?result.err(), "chain settled after the client went away");
            return;
        }

        match result {
            Ok(()) => {
                if ctx.enter(Phase::Finalized) {
                    if let Some(res) = ctx.finalize() {
                        ctx.deliver(res);
                    }
                }
            }
            Err(err) => ctx.onerror(err),
        }
    }
}

/// Flags the connection as closed when the transport drops the request
/// future before a response was handed over.
struct DisconnectGuard(Option<Arc<Signal>>);

impl DisconnectGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(signal) = self.0.take() {
            signal.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_exposed_errors_are_not_logged() {
        let settings = Settings::default();
        assert!(!is_logged(&settings, &Error::status_only(404)));
        assert!(!is_logged(&settings, &Error::http(400, "bad")));
        assert!(is_logged(&settings, &Error::status_only(500)));
        assert!(is_logged(&settings, &Error::other("boom")));
    }

    #[test]
    fn silent_applications_log_nothing() {
        let settings = Settings { silent: true, ..Settings::default() };
        assert!(!is_logged(&settings, &Error::other("boom")));
    }

    #[test]
    fn builder_overrides_settings() {
        let app = Application::new()
            .settings(Settings::default())
            .proxy(true)
            .subdomain_offset(3)
            .env("production");
        assert_eq!(
            app.inspect(),
            json!({"proxy": true, "subdomainOffset": 3, "env": "production"})
        );
    }

    #[test]
    fn callback_snapshots_the_middleware_list() {
        let app = Application::new().use_handler(|_| Box::pin(async { Ok(()) }));
        let before = app.callback();
        let app = app.use_handler(|_| Box::pin(async { Ok(()) }));
        assert_eq!(before.chain.len(), 1);
        assert_eq!(app.callback().chain.len(), 2);
    }

    #[tokio::test]
    async fn listen_rejects_bad_addresses() {
        let err = Application::new().listen("not an address").await.unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(a) if a == "not an address"));
    }
}
