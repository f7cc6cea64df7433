//! Decides what to do with an accepted email.
//!
//! Emails with attachments have each attachment uploaded, except attached
//! `message/rfc822` emails, which are unwrapped and dispatched in turn.
//! Emails without attachments are rendered to PDF and uploaded instead.
//! Processing is best effort: a failing attachment is logged and recorded
//! in the [`DispatchReport`] while its siblings carry on.

use std::io::{self, Read};
use std::sync::Arc;

use log::{debug, error, info, warn};
use mailparse::MailParseError;

use crate::mail::decode::{attachment_reader, AttachmentReader};
use crate::mail::{Attachment, ParsedEmail};
use crate::metrics::Metrics;
use crate::paperless::StoreError;

/// Nested emails beyond this depth are not unwrapped.
pub const MAX_NESTING_DEPTH: usize = 10;

pub trait DocumentStore: Send + Sync {
    fn upload(
        &self,
        document: AttachmentReader,
        filename: &str,
        tags: &[i64],
    ) -> Result<(), StoreError>;
}

pub trait Renderer: Send + Sync {
    fn render_html(&self, html: &[u8]) -> Result<AttachmentReader, RenderError>;
    fn render_text(&self, text: &[u8]) -> Result<AttachmentReader, RenderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no renderer configured")]
    Unavailable,
    #[error("email was empty")]
    EmptyBody,
    #[error("got wrong gotenberg status code: {status}")]
    Service { status: u16 },
    #[error("gotenberg request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("could not read attachment: {0}")]
    Read(#[from] io::Error),
    #[error("could not parse nested email: {0}")]
    NestedParse(#[from] MailParseError),
    #[error("nested emails deeper than {0} levels are not processed")]
    TooDeep(usize),
    #[error("could not upload document: {0}")]
    Upload(#[from] StoreError),
    #[error("could not render email: {0}")]
    Render(#[from] RenderError),
}

#[derive(Debug)]
pub struct Failure {
    pub filename: String,
    pub error: DispatchError,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub uploaded: usize,
    pub failures: Vec<Failure>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, filename: String, error: DispatchError) {
        self.failures.push(Failure { filename, error });
    }
}

pub struct Dispatcher {
    store: Arc<dyn DocumentStore>,
    renderer: Option<Arc<dyn Renderer>>,
    tags: Vec<i64>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        renderer: Option<Arc<dyn Renderer>>,
        tags: Vec<i64>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            renderer,
            tags,
            metrics,
        }
    }

    pub fn process(&self, email: ParsedEmail) -> DispatchReport {
        let mut report = DispatchReport::default();
        self.process_at(email, 0, &mut report);
        report
    }

    fn process_at(&self, email: ParsedEmail, depth: usize, report: &mut DispatchReport) {
        if email.attachments.is_empty() {
            match self.render_and_upload(&email, report) {
                Ok(()) => {}
                Err(RenderError::Unavailable) => {
                    warn!(
                        "[dispatch] got unhandled email subject={:?}, no renderer configured",
                        email.subject
                    );
                }
                Err(e) => {
                    error!(
                        "[dispatch] could not upload email contents subject={:?}: {}",
                        email.subject, e
                    );
                    report.fail(pdf_filename(&email.subject), e.into());
                }
            }
            return;
        }

        info!(
            "[dispatch] got email with {} attachments from={} subject={:?} depth={}",
            email.attachments.len(),
            email.from,
            email.subject,
            depth
        );
        debug!("[dispatch] email addressed to={:?}", email.to);
        for attachment in email.attachments {
            let filename = attachment.filename.clone();
            if let Err(e) = self.process_attachment(attachment, depth, report) {
                error!("[dispatch] filename={} failed: {}", filename, e);
                report.fail(filename, e);
            }
        }
    }

    fn process_attachment(
        &self,
        attachment: Attachment,
        depth: usize,
        report: &mut DispatchReport,
    ) -> Result<(), DispatchError> {
        debug!(
            "[dispatch] processing attachment filename={} content_type={}",
            attachment.filename, attachment.content_type
        );
        let filename = attachment.filename.clone();
        let nested = attachment.is_message();
        let mut content = attachment_reader(attachment);

        if nested {
            if depth >= MAX_NESTING_DEPTH {
                return Err(DispatchError::TooDeep(MAX_NESTING_DEPTH));
            }
            info!("[dispatch] found email attachment filename={}, processing", filename);
            let mut raw = Vec::new();
            content.read_to_end(&mut raw)?;
            let inner = ParsedEmail::parse(&raw)?;
            self.process_at(inner, depth + 1, report);
            return Ok(());
        }

        self.upload(content, &filename)?;
        report.uploaded += 1;
        Ok(())
    }

    /// Renders the HTML body, or failing that the text body, and uploads the PDF.
    /// An upload failure is recorded in the report rather than returned.
    fn render_and_upload(
        &self,
        email: &ParsedEmail,
        report: &mut DispatchReport,
    ) -> Result<(), RenderError> {
        let renderer = self.renderer.as_ref().ok_or(RenderError::Unavailable)?;
        info!(
            "[dispatch] got email with no attachments from={} subject={:?}",
            email.from, email.subject
        );

        let pdf = if let Some(html) = &email.html_body {
            renderer.render_html(html)?
        } else if let Some(text) = &email.text_body {
            renderer.render_text(text)?
        } else {
            return Err(RenderError::EmptyBody);
        };

        let filename = pdf_filename(&email.subject);
        match self.upload(pdf, &filename) {
            Ok(()) => report.uploaded += 1,
            Err(e) => {
                error!("[dispatch] could not upload converted email filename={}: {}", filename, e);
                report.fail(filename, e.into());
            }
        }
        Ok(())
    }

    fn upload(&self, document: AttachmentReader, filename: &str) -> Result<(), StoreError> {
        match self.store.upload(document, filename, &self.tags) {
            Ok(()) => {
                info!("[dispatch] uploaded filename={}", filename);
                self.metrics.document_uploaded();
                Ok(())
            }
            Err(e) => {
                if let StoreError::Rejected { status, body } = &e {
                    error!(
                        "[dispatch] paperless rejected filename={} status={} body={}",
                        filename,
                        status,
                        String::from_utf8_lossy(body)
                    );
                }
                self.metrics.upload_failed();
                Err(e)
            }
        }
    }
}

fn pdf_filename(subject: &str) -> String {
    if subject.is_empty() {
        "Email.pdf".to_string()
    } else {
        format!("{}.pdf", subject)
    }
}
