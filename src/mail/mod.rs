//! Inbound email model.
//!
//! A [`ParsedEmail`] is built from a `mailparse` tree and owns all of its
//! data, so it can be handed to the blocking dispatch thread. Attachment
//! bodies keep their transfer encoding; see [`decode::attachment_reader`].

pub mod decode;
pub mod sniff;

use mailparse::body::Body;
use mailparse::{DispositionType, MailAddr, MailHeaderMap, MailParseError, ParsedMail};

pub const MESSAGE_RFC822: &str = "message/rfc822";

#[derive(Debug, Clone, Default)]
pub struct ParsedEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: Option<Vec<u8>>,
    pub text_body: Option<Vec<u8>>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub transfer_encoding: Option<String>,
    /// Body bytes exactly as received, still transfer-encoded.
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn is_message(&self) -> bool {
        self.content_type.eq_ignore_ascii_case(MESSAGE_RFC822)
    }
}

impl ParsedEmail {
    pub fn parse(raw: &[u8]) -> Result<Self, MailParseError> {
        let parsed = mailparse::parse_mail(raw)?;
        Ok(Self::from_mail(&parsed))
    }

    fn from_mail(parsed: &ParsedMail) -> Self {
        let headers = &parsed.headers;
        let mut email = ParsedEmail {
            from: headers.get_first_value("From").unwrap_or_default(),
            to: recipients(parsed),
            subject: headers
                .get_first_value("Subject")
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            ..Default::default()
        };
        collect_parts(parsed, &mut email);
        email
    }
}

fn recipients(parsed: &ParsedMail) -> Vec<String> {
    let Some(header) = parsed.headers.get_first_header("To") else {
        return Vec::new();
    };
    match mailparse::addrparse_header(header) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.addr.clone()],
                MailAddr::Group(group) => group.addrs.iter().map(|i| i.addr.clone()).collect(),
            })
            .collect(),
        Err(_) => header
            .get_value()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

fn collect_parts(part: &ParsedMail, email: &mut ParsedEmail) {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    if mimetype.starts_with("multipart/") && !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, email);
        }
        return;
    }

    // A missing Content-Disposition header reads as a bare `inline`, so only
    // an explicit filename parameter marks an inline part as an attachment.
    let disposition = part.get_content_disposition();
    let disposition_filename = disposition
        .params
        .get("filename")
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());
    let is_message = mimetype == MESSAGE_RFC822;
    let is_attachment = match disposition.disposition {
        DispositionType::Attachment => true,
        DispositionType::Inline => disposition_filename.is_some(),
        _ => false,
    };
    let filename = disposition_filename.or_else(|| {
        part.ctype
            .params
            .get("name")
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
    });

    if is_attachment || is_message {
        let fallback = if is_message { "message.eml" } else { "attachment" };
        email.attachments.push(Attachment {
            filename: filename.unwrap_or_else(|| fallback.to_string()),
            content_type: mimetype,
            transfer_encoding: part.headers.get_first_value("Content-Transfer-Encoding"),
            content: encoded_body(part),
        });
        return;
    }

    match mimetype.as_str() {
        "text/html" if email.html_body.is_none() => email.html_body = body_text(part),
        "text/plain" if email.text_body.is_none() => email.text_body = body_text(part),
        _ => {}
    }
}

/// Decoded body of a text part; blank bodies count as absent.
fn body_text(part: &ParsedMail) -> Option<Vec<u8>> {
    part.get_body_raw()
        .ok()
        .filter(|body| !body.iter().all(u8::is_ascii_whitespace))
}

fn encoded_body(part: &ParsedMail) -> Vec<u8> {
    match part.get_body_encoded() {
        Body::Base64(body) | Body::QuotedPrintable(body) => body.get_raw().to_vec(),
        Body::SevenBit(body) | Body::EightBit(body) => body.get_raw().to_vec(),
        Body::Binary(body) => body.get_raw().to_vec(),
    }
}
