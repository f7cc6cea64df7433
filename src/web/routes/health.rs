use axum::response::Response;
use log::trace;

use crate::web::errors::ok;

pub async fn check() -> Response {
    trace!("[web] GET /health");
    ok()
}
