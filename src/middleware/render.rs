use std::sync::Arc;

use tera::Tera;
use tracing::debug;

use crate::compose::Next;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{BoxFuture, Middleware};

/// Makes [`Context::render`] available to everything mounted after it.
///
/// ```rust,no_run
/// use strata::{Application, middleware::Render};
/// use serde_json::json;
///
/// # fn main() -> strata::Result<()> {
/// let app = Application::new()
///     .use_middleware(Render::new("views/**/*.html")?)
///     .use_handler(|ctx| Box::pin(async move {
///         ctx.render("index.html", &json!({ "title": "home" }))
///     }));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Render {
    engine: Renderer,
}

/// The engine as stored in the request's extensions.
#[derive(Clone)]
pub(crate) struct Renderer(Arc<Tera>);

impl Render {
    /// Loads every template matching `glob`.
    pub fn new(glob: &str) -> Result<Self> {
        let tera = Tera::new(glob).map_err(Error::other)?;
        debug!(glob, templates = tera.get_template_names().count(), "templates loaded");
        Ok(Self::from_tera(tera))
    }

    /// Uses an engine that was set up by hand.
    pub fn from_tera(tera: Tera) -> Self {
        Self { engine: Renderer(Arc::new(tera)) }
    }
}

impl Renderer {
    pub(crate) fn render(&self, template: &str, data: &tera::Context) -> Result<String> {
        self.0
            .render(template, data)
            .map_err(|e| Error::http(500, format!("failed to render `{template}`: {e}")))
    }
}

impl Middleware for Render {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        ctx.extensions_mut().insert(self.engine.clone());
        next.run(ctx)
    }
}
