use std::time::Instant;

use tracing::info;

use crate::compose::Next;
use crate::context::Context;
use crate::handler::{BoxFuture, Middleware};

/// Per-request log line. Mount it first so the latency covers everything.
///
/// ```rust
/// use strata::{Application, middleware};
///
/// let app = Application::new().use_middleware(middleware::trace());
/// ```
pub fn trace() -> Trace {
    Trace
}

/// See [`trace()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.method().clone();
            let path = ctx.path().to_owned();

            let result = next.run(ctx).await;

            // An error has not been turned into a response yet; log the
            // status it will get.
            let status = match &result {
                Ok(()) => ctx.status(),
                Err(e) => e.status(),
            };
            info!(
                %method,
                path = %path,
                status,
                latency_us = start.elapsed().as_micros() as u64,
                "request"
            );
            result
        })
    }
}
