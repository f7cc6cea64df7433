pub mod health;
pub mod metrics;
pub mod sendgrid;

use super::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/sendgrid",
            post(sendgrid::receive).layer(DefaultBodyLimit::max(sendgrid::MAX_FORM_BYTES)),
        )
        .route("/health", get(health::check))
        .route("/metrics", get(metrics::export))
}
