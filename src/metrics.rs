//! Process-wide counters for the webhook pipeline.
//!
//! A single [`Metrics`] value is created at startup and shared through
//! `AppState`; every update is a relaxed atomic so request handlers never
//! contend on a lock.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds (seconds) of the processing-duration histogram buckets.
const DURATION_BUCKETS: [f64; 9] = [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Why an inbound email was dropped by the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Sender,
    Recipient,
}

impl FilterReason {
    fn label(self) -> &'static str {
        match self {
            FilterReason::Sender => "sender",
            FilterReason::Recipient => "recipient",
        }
    }
}

#[derive(Debug)]
pub struct Metrics {
    emails_received: AtomicU64,
    filtered_sender: AtomicU64,
    filtered_recipient: AtomicU64,
    documents_uploaded: AtomicU64,
    upload_failures: AtomicU64,
    duration: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            emails_received: AtomicU64::new(0),
            filtered_sender: AtomicU64::new(0),
            filtered_recipient: AtomicU64::new(0),
            documents_uploaded: AtomicU64::new(0),
            upload_failures: AtomicU64::new(0),
            duration: Histogram::new(),
        }
    }

    pub fn email_received(&self) {
        self.emails_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn email_filtered(&self, reason: FilterReason) {
        match reason {
            FilterReason::Sender => self.filtered_sender.fetch_add(1, Ordering::Relaxed),
            FilterReason::Recipient => self.filtered_recipient.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn document_uploaded(&self) {
        self.documents_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_failed(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_processing(&self, elapsed: Duration) {
        self.duration.observe(elapsed.as_secs_f64());
    }

    pub fn emails_received(&self) -> u64 {
        self.emails_received.load(Ordering::Relaxed)
    }

    pub fn emails_filtered(&self, reason: FilterReason) -> u64 {
        match reason {
            FilterReason::Sender => self.filtered_sender.load(Ordering::Relaxed),
            FilterReason::Recipient => self.filtered_recipient.load(Ordering::Relaxed),
        }
    }

    pub fn documents_uploaded(&self) -> u64 {
        self.documents_uploaded.load(Ordering::Relaxed)
    }

    pub fn upload_failures(&self) -> u64 {
        self.upload_failures.load(Ordering::Relaxed)
    }

    /// Export metrics in Prometheus text format
    pub fn prometheus_export(&self) -> String {
        let mut out = format!(
            "# HELP mailhook_emails_received_total Inbound emails with a valid envelope\n\
             # TYPE mailhook_emails_received_total counter\n\
             mailhook_emails_received_total {}\n\
             # HELP mailhook_emails_filtered_total Inbound emails dropped by the allow-list\n\
             # TYPE mailhook_emails_filtered_total counter\n\
             mailhook_emails_filtered_total{{reason=\"{}\"}} {}\n\
             mailhook_emails_filtered_total{{reason=\"{}\"}} {}\n\
             # HELP mailhook_documents_uploaded_total Documents accepted by Paperless\n\
             # TYPE mailhook_documents_uploaded_total counter\n\
             mailhook_documents_uploaded_total {}\n\
             # HELP mailhook_upload_failures_total Documents that failed to upload\n\
             # TYPE mailhook_upload_failures_total counter\n\
             mailhook_upload_failures_total {}\n",
            self.emails_received(),
            FilterReason::Sender.label(),
            self.emails_filtered(FilterReason::Sender),
            FilterReason::Recipient.label(),
            self.emails_filtered(FilterReason::Recipient),
            self.documents_uploaded(),
            self.upload_failures(),
        );
        self.duration.export(
            &mut out,
            "mailhook_email_processing_seconds",
            "Time spent processing an accepted email",
        );
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket histogram. The sum is kept in microseconds so it fits an atomic integer.
#[derive(Debug)]
struct Histogram {
    buckets: [AtomicU64; DURATION_BUCKETS.len()],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    fn observe(&self, secs: f64) {
        if let Some(idx) = DURATION_BUCKETS.iter().position(|bound| secs <= *bound) {
            self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((secs * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    fn export(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        // Buckets are stored non-cumulative; Prometheus wants running totals.
        let mut cumulative = 0;
        for (bound, bucket) in DURATION_BUCKETS.iter().zip(self.buckets.iter()) {
            cumulative += bucket.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, bound, cumulative);
        }
        let count = self.count.load(Ordering::Relaxed);
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{}_sum {}", name, sum);
        let _ = writeln!(out, "{}_count {}", name, count);
    }
}
