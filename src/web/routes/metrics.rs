use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::web::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn export(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.prometheus_export(),
    )
        .into_response()
}
