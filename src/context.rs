//! The per-request context every middleware receives.
//!
//! A [`Context`] owns one [`Request`] and one [`Response`], a request-scoped
//! [`State`] map, typed [`Extensions`] and the handle used to hand the final
//! response to the transport. It moves through [`Phase`]s exactly once:
//!
//! ```text
//! Created ──▶ Dispatched ──┬──▶ Finalized
//!                          └──▶ Errored
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::TryStreamExt;
use http::header::CONTENT_LENGTH;
use http::{Extensions, Method};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Notify, oneshot};
use tracing::debug;

use crate::application::Shared;
use crate::body::{self, Body, BodyStream, ResponseBody};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::fresh;
use crate::middleware::Renderer;
use crate::request::{Query, Request};
use crate::response::Response;
use crate::status;

/// Where a context is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Built, not yet handed to the middleware chain.
    Created,
    /// The chain is running.
    Dispatched,
    /// The chain settled and the response was finalized.
    Finalized,
    /// The chain failed or the client went away.
    Errored,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Errored)
    }
}

/// Request-scoped key/value map.
///
/// Reads fall back to the application's default state; writes only ever
/// touch this request.
pub struct State {
    local: HashMap<String, Value>,
    defaults: Arc<HashMap<String, Value>>,
}

impl State {
    pub(crate) fn new(defaults: Arc<HashMap<String, Value>>) -> Self {
        Self { local: HashMap::new(), defaults }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.local.get(key).or_else(|| self.defaults.get(key))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.local.insert(key.into(), value.into())
    }

    /// Removes the request's own value. A default for `key`, if any, becomes
    /// visible again.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.local.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.local.contains_key(key) || self.defaults.contains_key(key)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.defaults.iter().chain(&self.local)).finish()
    }
}

/// Connection liveness shared between the transport future and the
/// request task.
#[derive(Default)]
pub(crate) struct Signal {
    closed: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub(crate) async fn closed(&self) {
        while !self.is_closed() {
            self.notify.notified().await;
        }
    }
}

/// The write side of one request: where the finished response goes.
pub(crate) struct Outlet {
    tx: Option<oneshot::Sender<http::Response<ResponseBody>>>,
    signal: Arc<Signal>,
}

impl Outlet {
    pub(crate) fn new(tx: oneshot::Sender<http::Response<ResponseBody>>, signal: Arc<Signal>) -> Self {
        Self { tx: Some(tx), signal }
    }

    /// An outlet not attached to any connection. Delivered responses are
    /// discarded.
    pub(crate) fn detached() -> Self {
        Self { tx: None, signal: Arc::default() }
    }
}

/// Everything a middleware can see and change about one request.
pub struct Context {
    request: Request,
    response: Response,
    state: State,
    extensions: Extensions,
    app: Arc<Shared>,
    respond: bool,
    outlet: Outlet,
    phase: Phase,
}

impl Context {
    pub(crate) fn new(request: Request, app: Arc<Shared>, outlet: Outlet) -> Self {
        Self {
            request,
            response: Response::new(),
            state: State::new(Arc::clone(&app.state)),
            extensions: Extensions::new(),
            app,
            respond: true,
            outlet,
            phase: Phase::Created,
        }
    }

    // ── Parts ────────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request { &self.request }

    pub fn request_mut(&mut self) -> &mut Request { &mut self.request }

    pub fn response(&self) -> &Response { &self.response }

    pub fn response_mut(&mut self) -> &mut Response { &mut self.response }

    pub fn state(&self) -> &State { &self.state }

    pub fn state_mut(&mut self) -> &mut State { &mut self.state }

    pub fn extensions(&self) -> &Extensions { &self.extensions }

    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    pub fn settings(&self) -> &Settings { &self.app.settings }

    pub fn phase(&self) -> Phase { self.phase }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Moves to `next`. Terminal phases are sticky: once the context is
    /// finalized or errored, further transitions are refused.
    pub(crate) fn enter(&mut self, next: Phase) -> bool {
        if self.phase.is_terminal() {
            debug!(current = ?self.phase, refused = ?next, "context already settled");
            return false;
        }
        self.phase = next;
        true
    }

    /// Whether automatic finalization will run.
    pub fn respond(&self) -> bool { self.respond }

    /// Opts out of (or back into) automatic finalization.
    pub fn set_respond(&mut self, respond: bool) {
        self.respond = respond;
    }

    /// Whether a response can still reach the client.
    pub fn writable(&self) -> bool {
        !self.response.headers_sent && !self.outlet.signal.is_closed()
    }

    pub fn header_sent(&self) -> bool { self.response.header_sent() }

    /// Sends a hand-built response and disables automatic finalization.
    pub fn respond_raw(&mut self, res: http::Response<ResponseBody>) -> Result<()> {
        self.respond = false;
        if !self.writable() {
            return Err(Error::ConnectionClosed);
        }
        self.deliver(res);
        Ok(())
    }

    /// Hands `res` to the transport. Later header changes are ignored.
    pub(crate) fn deliver(&mut self, res: http::Response<ResponseBody>) {
        self.response.headers_sent = true;
        if let Some(tx) = self.outlet.tx.take() {
            if tx.send(res).is_err() {
                debug!("client went away before the response was handed over");
            }
        }
    }

    /// Turns the settled status and body into the response for the wire.
    ///
    /// Returns `None` when nothing should be written: automatic responses
    /// are disabled, or the connection can no longer be written to. Calling
    /// it twice yields the same status, headers and bytes, except for a
    /// streaming body, which can only be handed out once.
    pub fn finalize(&mut self) -> Option<http::Response<ResponseBody>> {
        if !self.respond {
            return None;
        }
        if !self.writable() {
            return None;
        }

        if status::is_empty(self.response.status()) {
            self.response.set_body(Body::Empty);
            return Some(self.response.to_http(body::empty()));
        }

        if self.request.method() == Method::HEAD {
            if !self.response.has(CONTENT_LENGTH.as_str()) {
                if let Some(len) = self.response.length() {
                    self.response.set_length(len);
                }
            }
            return Some(self.response.to_http(body::empty()));
        }

        let out = match self.response.body() {
            Body::Empty => {
                let text = match self.response.message() {
                    "" => self.response.status().to_string(),
                    message => message.to_owned(),
                };
                self.response.set_type("text");
                self.response.set_length(text.len() as u64);
                body::full(text)
            }
            Body::Bytes(bytes) => body::full(bytes.clone()),
            Body::Text(text) => body::full(text.clone()),
            Body::Stream(_) => match self.response.take_body() {
                Body::Stream(stream) => self.pipe(stream),
                _ => body::empty(),
            },
            Body::Json(value) => {
                let text = value.to_string();
                self.response.set_length(text.len() as u64);
                body::full(text)
            }
        };
        Some(self.response.to_http(out))
    }

    /// Adapts a body stream for the transport. Read failures reach the
    /// application's error handler; the response head is already gone by then.
    fn pipe(&self, stream: BodyStream) -> ResponseBody {
        let app = Arc::clone(&self.app);
        let frames = stream
            .into_inner()
            .inspect_err(move |e| app.report(&Error::Stream(e.to_string()), None))
            .map_ok(Frame::data);
        StreamBody::new(frames).boxed_unsync()
    }

    /// The error path: report `err`, then replace whatever the handlers built
    /// with a plain-text error response.
    ///
    /// Handler headers are discarded. The body is the error message when it
    /// is safe to expose, else the status' reason phrase. Nothing is written
    /// when the response already left or the client is gone.
    pub fn onerror(&mut self, err: Error) {
        if !self.enter(Phase::Errored) {
            return;
        }
        self.app.report(&err, Some(self));

        if self.response.header_sent() || !self.writable() {
            return;
        }

        let code = err.status();
        let text = match &err {
            Error::Http { message, .. } if err.expose() => message.clone(),
            _ => status::reason(code).map_or_else(|| code.to_string(), str::to_owned),
        };

        self.response.clear_headers();
        self.response.set_type("text");
        self.response.apply_status(code);
        self.response.set_body(text.clone());
        self.response.set_length(text.len() as u64);
        let res = self.response.to_http(body::full(text));
        self.deliver(res);
    }

    // ── Errors raised by handlers ────────────────────────────────────────────

    /// Builds an HTTP error for `return Err(ctx.throw(…))`.
    ///
    /// An empty message becomes the status' reason phrase. Errors below 500
    /// are exposed to the client.
    pub fn throw(&self, status: u16, message: impl Into<String>) -> Error {
        let message = message.into();
        if message.is_empty() {
            Error::status_only(status)
        } else {
            Error::http(status, message)
        }
    }

    /// `Err(throw(status, message))` unless `cond` holds.
    pub fn assert(&self, cond: bool, status: u16, message: impl Into<String>) -> Result<()> {
        if cond { Ok(()) } else { Err(self.throw(status, message)) }
    }

    // ── Request and response working together ────────────────────────────────

    /// Renders `template` with `data` into the response body.
    ///
    /// Needs [`Render`](crate::middleware::Render) mounted upstream. A missing
    /// engine, missing template or failing template is a `500`.
    pub fn render(&mut self, template: &str, data: &impl Serialize) -> Result<()> {
        let Some(engine) = self.extensions.get::<Renderer>() else {
            return Err(Error::http(500, "no template engine installed"));
        };
        let data = tera::Context::from_serialize(data)
            .map_err(|e| Error::http(500, format!("invalid template data: {e}")))?;
        let html = engine.render(template, &data)?;
        self.set_body(html);
        Ok(())
    }

    /// Redirects to `url`. `"back"` means the `Referer`, then `alt`, then `/`.
    pub fn redirect(&mut self, url: &str, alt: Option<&str>) -> Result<()> {
        let target = if url == "back" {
            self.request.get("referrer").or(alt).unwrap_or("/").to_owned()
        } else {
            url.to_owned()
        };
        let html = self.request.accepts(&["html"]).is_some();
        self.response.redirect_to(&target, html)
    }

    /// Whether the client's cached copy is still valid.
    ///
    /// Only `GET`/`HEAD` requests answered with a 2xx or `304` can be fresh.
    pub fn fresh(&self) -> bool {
        let method = self.request.method();
        if method != Method::GET && method != Method::HEAD {
            return false;
        }
        let code = self.response.status();
        if (200..300).contains(&code) || code == 304 {
            fresh::is_fresh(self.request.headers(), self.response.headers())
        } else {
            false
        }
    }

    pub fn stale(&self) -> bool { !self.fresh() }

    // ── Shorthands ───────────────────────────────────────────────────────────

    pub fn status(&self) -> u16 { self.response.status() }

    pub fn set_status(&mut self, code: u16) -> Result<()> { self.response.set_status(code) }

    pub fn message(&self) -> &str { self.response.message() }

    pub fn body(&self) -> &Body { self.response.body() }

    pub fn set_body(&mut self, body: impl Into<Body>) { self.response.set_body(body) }

    /// Sets a response header.
    pub fn set(&mut self, field: &str, value: &str) -> Result<()> { self.response.set(field, value) }

    pub fn append(&mut self, field: &str, value: &str) -> Result<()> { self.response.append(field, value) }

    pub fn remove(&mut self, field: &str) { self.response.remove(field) }

    /// Reads a *request* header.
    pub fn get(&self, field: &str) -> Option<&str> { self.request.get(field) }

    pub fn set_type(&mut self, ty: &str) { self.response.set_type(ty) }

    pub fn attachment(&mut self, filename: Option<&str>) -> Result<()> { self.response.attachment(filename) }

    pub fn method(&self) -> &Method { self.request.method() }

    pub fn path(&self) -> &str { self.request.path() }

    pub fn query(&self) -> &Query { self.request.query() }

    pub fn host(&self) -> &str { self.request.host() }

    pub fn hostname(&self) -> &str { self.request.hostname() }

    pub fn ip(&self) -> &str { self.request.ip() }

    pub fn accepts(&self, types: &[&str]) -> Option<String> { self.request.accepts(types) }

    /// Matches the *request* content type.
    pub fn is(&self, types: &[&str]) -> Option<String> { self.request.is(types) }

    /// `{request, response, app}` summary.
    pub fn inspect(&self) -> Value {
        json!({
            "request": self.request.inspect(),
            "response": self.response.inspect(),
            "app": self.app.inspect(),
        })
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.request.method())
            .field("url", &self.request.url())
            .field("status", &self.response.status())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
