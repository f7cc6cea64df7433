use serde::Deserialize;

use crate::metrics::FilterReason;

/// Addressing metadata SendGrid posts alongside the raw message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub from: String,
}

/// Sender allow-list plus an optional recipient every accepted email must be addressed to.
#[derive(Debug, Clone)]
pub struct AllowList {
    allowed_emails: Vec<String>,
    to_address: Option<String>,
}

impl AllowList {
    pub fn new(allowed_emails: Vec<String>, to_address: Option<String>) -> Self {
        Self {
            allowed_emails,
            to_address: to_address.filter(|a| !a.is_empty()),
        }
    }

    /// Returns the reason the envelope is rejected, or `None` when it may be processed.
    pub fn check(&self, envelope: &Envelope) -> Option<FilterReason> {
        let known_sender = self
            .allowed_emails
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&envelope.from));
        if !known_sender {
            return Some(FilterReason::Sender);
        }

        if let Some(to_address) = &self.to_address {
            let addressed = envelope
                .to
                .iter()
                .any(|to| to.eq_ignore_ascii_case(to_address));
            if !addressed {
                return Some(FilterReason::Recipient);
            }
        }

        None
    }

    pub fn is_allowed(&self, envelope: &Envelope) -> bool {
        self.check(envelope).is_none()
    }
}
