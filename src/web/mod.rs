mod errors;
mod routes;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use log::{debug, info};
use tokio::sync::oneshot;

use crate::dispatch::Dispatcher;
use crate::filter::AllowList;
use crate::metrics::Metrics;
use crate::web::errors::status_response;

// ── Shared State ──

#[derive(Clone)]
pub struct AppState {
    pub allow_list: Arc<AllowList>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<Metrics>,
}

/// Runs `f` on its own OS thread and waits for the result.
///
/// The Paperless and Gotenberg clients are blocking reqwest clients, which
/// panic when driven from inside the tokio runtime, so they get a plain
/// thread rather than `spawn_blocking`.
pub async fn blocking<F, R>(f: F) -> Result<R, oneshot::error::RecvError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.await
}

// ── Server ──

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::routes())
        .fallback(handle_not_found)
        .with_state(state)
}

pub async fn start_server(state: AppState, addr: &str) -> anyhow::Result<()> {
    info!("[web] initializing http server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind address {}", addr))?;
    info!("[web] listening on {}", addr);

    axum::serve(listener, app(state))
        .await
        .context("http server error")
}

async fn handle_not_found(uri: Uri) -> Response {
    debug!("[web] no route for {}", uri.path());
    status_response(StatusCode::NOT_FOUND, "doesn't look like anything to me")
}
