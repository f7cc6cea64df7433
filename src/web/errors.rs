use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Plain-text response; SendGrid only looks at the status code.
pub fn status_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

pub fn ok() -> Response {
    status_response(StatusCode::OK, "OK")
}

pub fn bad_request(message: impl Into<String>) -> Response {
    status_response(StatusCode::BAD_REQUEST, message)
}
