//! TCP listener, connection tasks and graceful shutdown.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server:
//! 1. Stops calling `listener.accept()`, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Orchestrators that send SIGTERM before SIGKILL (Kubernetes waits
//! `terminationGracePeriodSeconds`) should allow longer than the slowest
//! request.

use std::net::SocketAddr;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::application::Callback;
use crate::body::ResponseBody;
use crate::error::{BoxError, Error, Result};
use crate::request::Peer;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use strata::{Application, Server};
    ///
    /// # async fn run() -> strata::Result<()> {
    /// let app = Application::new();
    /// Server::bind(([0, 0, 0, 0], 3000).into()).serve(app.callback()).await
    /// # }
    /// ```
    pub fn bind(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Accepts connections and answers their requests through `callback`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, callback: Callback) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "strata listening");
        Self::serve_on(listener, callback).await
    }

    /// Like [`serve`](Server::serve), on a listener that is already bound.
    pub async fn serve_on(listener: TcpListener, callback: Callback) -> Result<()> {
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    tasks.spawn(serve_connection(stream, remote_addr, callback.clone()));
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("strata stopped");
        Ok(())
    }
}

/// Serves every request of one connection, HTTP/1.1 or HTTP/2.
async fn serve_connection(stream: tokio::net::TcpStream, remote_addr: SocketAddr, callback: Callback) {
    let io = TokioIo::new(stream);
    let svc = service_fn(move |req| {
        let callback = callback.clone();
        async move { dispatch(callback, req, remote_addr).await }
    });

    if let Err(e) = ConnBuilder::new(TokioExecutor::new()).serve_connection(io, svc).await {
        debug!(peer = %remote_addr, "connection error: {e}");
    }
}

/// One request, start to finish. An `Err` makes hyper drop the connection,
/// which is all that is left to do when nothing was produced.
async fn dispatch(
    callback: Callback,
    req: http::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<ResponseBody>> {
    let req = req.map(|body| body.map_err(BoxError::from).boxed_unsync());
    match callback.handle(req, Peer::new(remote_addr)).await {
        Some(res) => Ok(res),
        None => {
            debug!(peer = %remote_addr, "no response produced, closing connection");
            Err(Error::NoResponse)
        }
    }
}

/// Resolves on SIGTERM or SIGINT (Ctrl-C); on non-Unix platforms only on
/// Ctrl-C. A signal that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
