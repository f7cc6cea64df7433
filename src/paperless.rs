//! Client for the Paperless-ngx REST API.
//!
//! Endpoints used:
//!   `POST /api/documents/post_document/` — upload one document with tag IDs
//!   `GET  /api/tags/?name__iexact=…`     — resolve a tag name to its ID
//!
//! Every call is blocking; run it off the async executor.

use std::io::Read;
use std::time::Duration;

use log::{debug, error, trace};
use reqwest::blocking::{multipart, Client, Request, Response};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::dispatch::DocumentStore;
use crate::mail::decode::AttachmentReader;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("paperless request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("got bad paperless status code: {status}")]
    Rejected { status: u16, body: Vec<u8> },
    #[error("tag {tag:?} matched {found} paperless tags, expected exactly one")]
    BadTag { tag: String, found: usize },
    #[error("paperless api key is not a valid header value")]
    InvalidApiKey,
}

/// Anything that can send a prepared request.
pub trait HttpClient: Send + Sync {
    fn execute(&self, request: Request) -> reqwest::Result<Response>;
}

impl HttpClient for Client {
    fn execute(&self, request: Request) -> reqwest::Result<Response> {
        Client::execute(self, request)
    }
}

/// Adds the Paperless `Authorization: Token …` header to every request.
pub struct TokenClient<C> {
    inner: C,
    authorization: HeaderValue,
}

impl<C> TokenClient<C> {
    pub fn new(inner: C, api_key: &str) -> Result<Self, StoreError> {
        let mut authorization = HeaderValue::from_str(&format!("Token {}", api_key))
            .map_err(|_| StoreError::InvalidApiKey)?;
        authorization.set_sensitive(true);
        Ok(Self {
            inner,
            authorization,
        })
    }
}

impl<C: HttpClient> HttpClient for TokenClient<C> {
    fn execute(&self, mut request: Request) -> reqwest::Result<Response> {
        request
            .headers_mut()
            .insert(AUTHORIZATION, self.authorization.clone());
        self.inner.execute(request)
    }
}

#[derive(Deserialize)]
struct TagResults {
    results: Vec<TagResult>,
}

#[derive(Deserialize)]
struct TagResult {
    id: i64,
}

pub struct Paperless {
    endpoint: String,
    timeout: Duration,
    /// Only used to assemble requests; sending goes through `client`.
    builder: Client,
    client: Box<dyn HttpClient>,
}

impl Paperless {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        let authorized = TokenClient::new(client.clone(), api_key)?;
        Ok(Self::with_client(endpoint, timeout, client, authorized))
    }

    pub fn with_client<C: HttpClient + 'static>(
        endpoint: &str,
        timeout: Duration,
        builder: Client,
        client: C,
    ) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
            builder,
            client: Box::new(client),
        }
    }

    /// Streams `document` to Paperless under `filename` with the given tag IDs.
    pub fn upload_document<R: Read + Send + 'static>(
        &self,
        document: R,
        filename: &str,
        tags: &[i64],
    ) -> Result<(), StoreError> {
        debug!("[paperless] uploading filename={}", filename);

        let mut form = multipart::Form::new().part(
            "document",
            multipart::Part::reader(document).file_name(filename.to_string()),
        );
        for tag in tags {
            form = form.text("tags", tag.to_string());
        }

        let request = self
            .builder
            .post(format!("{}/api/documents/post_document/", self.endpoint))
            .timeout(self.timeout)
            .multipart(form)
            .build()?;
        let response = self.client.execute(request)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = match response.bytes() {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => {
                    error!("[paperless] could not read paperless error response: {}", e);
                    Vec::new()
                }
            };
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        trace!("[paperless] uploaded filename={}", filename);
        Ok(())
    }

    /// Looks up a tag by case-insensitive name. Exactly one match is required.
    pub fn resolve_tag(&self, tag: &str) -> Result<i64, StoreError> {
        debug!("[paperless] looking up tag={}", tag);

        let request = self
            .builder
            .get(format!("{}/api/tags/", self.endpoint))
            .query(&[("name__iexact", tag)])
            .timeout(self.timeout)
            .build()?;
        let response = self.client.execute(request)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.bytes().map(|b| b.to_vec()).unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let results: TagResults = response.json()?;
        match results.results.as_slice() {
            [only] => {
                trace!("[paperless] resolved tag={} to id={}", tag, only.id);
                Ok(only.id)
            }
            other => Err(StoreError::BadTag {
                tag: tag.to_string(),
                found: other.len(),
            }),
        }
    }

    pub fn resolve_tags(&self, tags: &[String]) -> Result<Vec<i64>, StoreError> {
        tags.iter().map(|tag| self.resolve_tag(tag)).collect()
    }
}

impl DocumentStore for Paperless {
    fn upload(
        &self,
        document: AttachmentReader,
        filename: &str,
        tags: &[i64],
    ) -> Result<(), StoreError> {
        self.upload_document(document, filename, tags)
    }
}
