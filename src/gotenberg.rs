//! Gotenberg client used to turn email bodies into PDFs.

use std::time::Duration;

use log::debug;
use reqwest::blocking::{multipart, Client, Response};
use reqwest::StatusCode;

use crate::dispatch::{RenderError, Renderer};
use crate::mail::decode::AttachmentReader;

/// Upper bound on a single conversion, including reading the PDF back.
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

const HTML_ROUTE: &str = "/forms/chromium/convert/html";
const OFFICE_ROUTE: &str = "/forms/libreoffice/convert";

pub struct Gotenberg {
    endpoint: String,
    client: Client,
}

impl Gotenberg {
    pub fn new(endpoint: &str) -> Result<Self, RenderError> {
        let client = Client::builder().timeout(RENDER_TIMEOUT).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn convert(&self, route: &str, filename: &str, content: &[u8]) -> Result<Response, RenderError> {
        debug!("[gotenberg] converting {} via {}", filename, route);

        let part = multipart::Part::bytes(content.to_vec()).file_name(filename.to_string());
        let form = multipart::Form::new().part("files", part);

        let response = self
            .client
            .post(format!("{}{}", self.endpoint, route))
            .timeout(RENDER_TIMEOUT)
            .multipart(form)
            .send()?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(RenderError::Service {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl Renderer for Gotenberg {
    fn render_html(&self, html: &[u8]) -> Result<AttachmentReader, RenderError> {
        Ok(Box::new(self.convert(HTML_ROUTE, "index.html", html)?))
    }

    fn render_text(&self, text: &[u8]) -> Result<AttachmentReader, RenderError> {
        Ok(Box::new(self.convert(OFFICE_ROUTE, "index.txt", text)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::blocking;
    use std::io::Read;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test(flavor = "multi_thread")]
    async fn html_goes_to_chromium_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(HTML_ROUTE))
            .and(body_string_contains("filename=\"index.html\""))
            .and(body_string_contains("<p>hi</p>"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-html".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let pdf = blocking(move || {
            let mut out = Vec::new();
            Gotenberg::new(&uri)
                .unwrap()
                .render_html(b"<p>hi</p>")
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
            out
        })
        .await
        .unwrap();

        assert_eq!(pdf, b"%PDF-html");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn text_goes_to_libreoffice_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(OFFICE_ROUTE))
            .and(body_string_contains("filename=\"index.txt\""))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-text".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let uri = server.uri();
        let pdf = blocking(move || {
            let mut out = Vec::new();
            Gotenberg::new(&uri)
                .unwrap()
                .render_text(b"plain words")
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
            out
        })
        .await
        .unwrap();

        assert_eq!(pdf, b"%PDF-text");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_200_is_a_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let uri = server.uri();
        let result = blocking(move || Gotenberg::new(&uri).unwrap().render_html(b"<p>x</p>").map(|_| ()))
            .await
            .unwrap();

        assert!(matches!(result, Err(RenderError::Service { status: 503 })));
    }
}
