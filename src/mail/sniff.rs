//! Checks whether attachment bytes really use the transfer encoding their
//! headers claim. Senders get `Content-Transfer-Encoding` wrong often enough
//! that decoding blindly corrupts binary attachments.
//!
//! Both checks are heuristics. `is_base64` only looks at the first
//! [`SNIFF_WINDOW`] significant bytes, so damage further into a large
//! attachment is not caught here and surfaces as a read error during upload.

use std::io::{self, Read};

use base64::Engine;

use super::decode::{QuotedPrintableReader, BASE64_ENGINE};

pub const SNIFF_WINDOW: usize = 1024;

/// Returns true when the whole buffer decodes as quoted-printable without a
/// formatting error.
pub fn is_quoted_printable(content: &[u8]) -> bool {
    let mut reader = QuotedPrintableReader::new(content);
    let mut buf = [0u8; SNIFF_WINDOW];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return false,
        }
    }
}

/// Returns true when the first window of the buffer is valid padded base64.
/// Line breaks are ignored, as MIME wraps base64 bodies at 76 columns.
pub fn is_base64(content: &[u8]) -> bool {
    let window: Vec<u8> = content
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .take(SNIFF_WINDOW)
        .collect();
    BASE64_ENGINE.decode(&window).is_ok()
}
