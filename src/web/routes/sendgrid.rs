//! SendGrid Inbound Parse webhook.
//!
//! Endpoint: `POST /sendgrid` (multipart/form-data)
//!   `envelope` — JSON `{"to": [...], "from": "..."}`
//!   `email`    — the raw RFC 5322 message
//!
//! Once the form is readable the answer is always `200 OK`: SendGrid retries
//! anything else, and a retry would only redeliver a message that was
//! already handled or deliberately dropped.

use std::time::Instant;

use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::response::Response;
use log::{debug, error, info, warn};

use crate::filter::Envelope;
use crate::mail::ParsedEmail;
use crate::metrics::FilterReason;
use crate::web::errors::{bad_request, ok};
use crate::web::{blocking, AppState};

pub const MAX_FORM_BYTES: usize = 10 * 1024 * 1024;

#[derive(Default)]
struct InboundForm {
    envelope: Option<String>,
    email: Option<Vec<u8>>,
}

async fn read_form(multipart: &mut Multipart) -> Result<InboundForm, MultipartError> {
    let mut form = InboundForm::default();
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "envelope" if form.envelope.is_none() => {
                form.envelope = Some(field.text().await?);
            }
            "email" if form.email.is_none() => {
                form.email = Some(field.bytes().await?.to_vec());
            }
            _ => {}
        }
    }
    Ok(form)
}

pub async fn receive(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => {
            error!("[sendgrid] unable to parse incoming email: {}", e);
            return bad_request(format!("bad request: {}", e));
        }
    };
    let form = match read_form(&mut multipart).await {
        Ok(f) => f,
        Err(e) => {
            error!("[sendgrid] unable to parse incoming email: {}", e);
            return bad_request(format!("bad request: {}", e));
        }
    };

    let Some(envelope) = form.envelope else {
        error!("[sendgrid] email was missing envelope");
        return bad_request("missing envelope");
    };
    let envelope: Envelope = match serde_json::from_str(&envelope) {
        Ok(e) => e,
        Err(e) => {
            error!("[sendgrid] email envelope was not expected json: {}", e);
            return bad_request(format!("bad envelope: {}", e));
        }
    };

    state.metrics.email_received();
    debug!("[sendgrid] got email from={} to={:?}", envelope.from, envelope.to);

    if let Some(reason) = state.allow_list.check(&envelope) {
        match reason {
            FilterReason::Sender => warn!(
                "[sendgrid] email was from unknown sender from={}, ignoring",
                envelope.from
            ),
            FilterReason::Recipient => warn!(
                "[sendgrid] email was not addressed to correct email to={:?}, ignoring",
                envelope.to
            ),
        }
        state.metrics.email_filtered(reason);
        return ok();
    }

    let Some(raw) = form.email else {
        error!("[sendgrid] email was missing email body from={}", envelope.from);
        return bad_request("missing email");
    };

    let started = Instant::now();
    let dispatcher = state.dispatcher.clone();
    let from = envelope.from.clone();
    let outcome = blocking(move || {
        let email = ParsedEmail::parse(&raw).unwrap_or_else(|e| {
            error!("[sendgrid] email could not be parsed from={}: {}", from, e);
            ParsedEmail::default()
        });
        dispatcher.process(email)
    })
    .await;
    state.metrics.observe_processing(started.elapsed());

    match outcome {
        Ok(report) if report.is_success() => info!(
            "[sendgrid] finished handling email from={} uploaded={}",
            envelope.from, report.uploaded
        ),
        Ok(report) => {
            warn!(
                "[sendgrid] finished handling email from={} uploaded={} failed={}",
                envelope.from,
                report.uploaded,
                report.failures.len()
            );
            for failure in &report.failures {
                debug!("[sendgrid]   {}: {}", failure.filename, failure.error);
            }
        }
        Err(_) => error!(
            "[sendgrid] processing thread for email from={} exited early",
            envelope.from
        ),
    }

    ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::dispatch::testing::{FakeRenderer, RecordingStore};
    use crate::dispatch::{Dispatcher, Renderer};
    use crate::filter::AllowList;
    use crate::mail::fixtures;
    use crate::metrics::Metrics;
    use crate::web::app;

    const BOUNDARY: &str = "XsendgridBoundaryX";
    const ENVELOPE: &str = r#"{"to":["input@example.com"],"from":"sender@example.com"}"#;

    struct Harness {
        state: AppState,
        store: Arc<RecordingStore>,
    }

    fn harness(store: RecordingStore, renderer: Option<FakeRenderer>) -> Harness {
        let store = Arc::new(store);
        let metrics = Arc::new(Metrics::new());
        let renderer = renderer.map(|r| Arc::new(r) as Arc<dyn Renderer>);
        let state = AppState {
            allow_list: Arc::new(AllowList::new(
                vec!["sender@example.com".to_string()],
                Some("input@example.com".to_string()),
            )),
            dispatcher: Arc::new(Dispatcher::new(store.clone(), renderer, vec![3], metrics.clone())),
            metrics,
        };
        Harness { state, store }
    }

    fn form(fields: &[(&str, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        Request::builder()
            .method("POST")
            .uri("/sendgrid")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, String) {
        let response = app(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[tokio::test]
    async fn html_email_is_rendered_and_uploaded() {
        let h = harness(RecordingStore::default(), Some(FakeRenderer::default()));

        let (status, body) = send(
            h.state.clone(),
            form(&[("envelope", ENVELOPE), ("email", fixtures::HTML_ONLY)]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        let uploads = h.store.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].filename, "Receipt.pdf");
        assert_eq!(uploads[0].tags, vec![3]);
        assert_eq!(h.state.metrics.emails_received(), 1);
    }

    #[tokio::test]
    async fn nested_email_produces_two_uploads() {
        let h = harness(RecordingStore::default(), None);

        let (status, _) = send(
            h.state.clone(),
            form(&[("envelope", ENVELOPE), ("email", fixtures::NESTED)]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<String> = h.store.uploads().into_iter().map(|u| u.filename).collect();
        assert_eq!(names, vec!["invoice.pdf", "notes.txt"]);
        assert_eq!(h.store.uploads()[0].content, b"test");
    }

    #[tokio::test]
    async fn upload_failure_still_answers_ok() {
        let h = harness(RecordingStore::failing_on("invoice.pdf"), None);

        let (status, body) = send(
            h.state.clone(),
            form(&[("envelope", ENVELOPE), ("email", fixtures::NESTED)]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        let names: Vec<String> = h.store.uploads().into_iter().map(|u| u.filename).collect();
        assert_eq!(names, vec!["notes.txt"]);
        assert_eq!(h.state.metrics.upload_failures(), 1);
    }

    #[tokio::test]
    async fn unknown_sender_is_dropped_with_ok() {
        let h = harness(RecordingStore::default(), Some(FakeRenderer::default()));
        let envelope = r#"{"to":["input@example.com"],"from":"stranger@example.com"}"#;

        let (status, body) = send(
            h.state.clone(),
            form(&[("envelope", envelope), ("email", fixtures::HTML_ONLY)]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        assert!(h.store.uploads().is_empty());
        assert_eq!(h.state.metrics.emails_filtered(FilterReason::Sender), 1);
    }

    #[tokio::test]
    async fn wrong_recipient_is_dropped_with_ok() {
        let h = harness(RecordingStore::default(), Some(FakeRenderer::default()));
        let envelope = r#"{"to":["elsewhere@example.com"],"from":"sender@example.com"}"#;

        let (status, _) = send(
            h.state.clone(),
            form(&[("envelope", envelope), ("email", fixtures::HTML_ONLY)]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(h.store.uploads().is_empty());
        assert_eq!(h.state.metrics.emails_filtered(FilterReason::Recipient), 1);
    }

    #[tokio::test]
    async fn missing_envelope_is_bad_request() {
        let h = harness(RecordingStore::default(), None);

        let (status, body) = send(h.state, form(&[("email", fixtures::PLAIN)])).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "missing envelope");
    }

    #[tokio::test]
    async fn invalid_envelope_json_is_bad_request() {
        let h = harness(RecordingStore::default(), None);

        let (status, body) = send(
            h.state,
            form(&[("envelope", "{not json"), ("email", fixtures::PLAIN)]),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("bad envelope: "));
    }

    #[tokio::test]
    async fn missing_email_is_bad_request() {
        let h = harness(RecordingStore::default(), None);

        let (status, body) = send(h.state, form(&[("envelope", ENVELOPE)])).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "missing email");
    }

    #[tokio::test]
    async fn non_multipart_body_is_bad_request() {
        let h = harness(RecordingStore::default(), None);
        let request = Request::builder()
            .method("POST")
            .uri("/sendgrid")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let (status, body) = send(h.state, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("bad request: "));
    }

    #[tokio::test]
    async fn blank_email_is_not_uploaded() {
        let h = harness(RecordingStore::default(), Some(FakeRenderer::default()));

        let (status, _) = send(
            h.state.clone(),
            form(&[("envelope", ENVELOPE), ("email", "")]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(h.store.uploads().is_empty());
    }

    #[tokio::test]
    async fn unparsable_email_still_answers_ok() {
        let h = harness(RecordingStore::default(), Some(FakeRenderer::default()));

        let (status, body) = send(
            h.state.clone(),
            form(&[("envelope", ENVELOPE), ("email", fixtures::BROKEN)]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        assert!(h.store.uploads().is_empty());
        assert_eq!(h.state.metrics.emails_received(), 1);
    }

    #[tokio::test]
    async fn health_and_metrics_are_served() {
        let h = harness(RecordingStore::default(), None);

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(h.state.clone(), health).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        let metrics = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let (status, body) = send(h.state.clone(), metrics).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("mailhook_emails_received_total"));
        assert!(body.contains("mailhook_emails_filtered_total"));
        assert!(body.contains("mailhook_email_processing_seconds_bucket"));

        let missing = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let (status, body) = send(h.state, missing).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "doesn't look like anything to me");
    }
}
