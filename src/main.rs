mod config;
mod dispatch;
mod filter;
mod gotenberg;
mod mail;
mod metrics;
mod paperless;
mod web;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use log::{debug, info};

use crate::config::Config;
use crate::dispatch::{Dispatcher, Renderer};
use crate::filter::AllowList;
use crate::gotenberg::Gotenberg;
use crate::metrics::Metrics;
use crate::paperless::Paperless;

// The Paperless and Gotenberg clients are blocking, so everything that
// touches them at startup happens before the tokio runtime exists.
fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let config = Config::parse().normalize();

    let default_level = if config.debug { "trace" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    info!("[main] mailhook starting, paperless={}", config.paperless_endpoint);
    if let Ok(path) = dotenv {
        debug!("[main] loaded environment from {}", path.display());
    }

    if config.allowed_emails.is_empty() {
        bail!("MAILHOOK_ALLOWED_EMAILS must list at least one sender");
    }
    debug!("[main] allowed senders: {}", config.allowed_emails.join(", "));

    let paperless = Paperless::new(
        &config.paperless_endpoint,
        &config.paperless_api_key,
        Duration::from_secs(config.upload_timeout),
    )
    .context("failed to build paperless client")?;

    let tags = paperless
        .resolve_tags(&config.paperless_tags)
        .context("failed to resolve paperless tags")?;
    info!("[main] resolved {} paperless tags: {:?}", tags.len(), tags);

    let renderer: Option<Arc<dyn Renderer>> = match &config.gotenberg_endpoint {
        Some(endpoint) => {
            info!("[main] found gotenberg endpoint {}, enabling", endpoint);
            let gotenberg: Arc<dyn Renderer> =
                Arc::new(Gotenberg::new(endpoint).context("failed to build gotenberg client")?);
            Some(gotenberg)
        }
        None => {
            info!("[main] no gotenberg endpoint, emails without attachments will be skipped");
            None
        }
    };

    let metrics = Arc::new(Metrics::new());
    let dispatcher = Dispatcher::new(Arc::new(paperless), renderer, tags, metrics.clone());
    let state = web::AppState {
        allow_list: Arc::new(AllowList::new(config.allowed_emails, config.to_address)),
        dispatcher: Arc::new(dispatcher),
        metrics,
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(web::start_server(state, &config.http_host))
}
