use std::io::{self, BufRead, Cursor, Read};

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::read::DecoderReader;
use log::{trace, warn};

use super::sniff::{is_base64, is_quoted_printable};
use super::Attachment;

/// Standard padded base64 that tolerates non-zero trailing bits, which some
/// mailers emit.
pub(super) static BASE64_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_allow_trailing_bits(true),
);

/// A forward-only stream of decoded attachment bytes.
pub type AttachmentReader = Box<dyn Read + Send>;

/// Wraps the raw attachment body in the decoder its transfer encoding calls
/// for. When the body does not look like the declared encoding the raw bytes
/// are passed through untouched.
pub fn attachment_reader(attachment: Attachment) -> AttachmentReader {
    let encoding = attachment
        .transfer_encoding
        .as_deref()
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();
    let content = attachment.content;

    match encoding.as_str() {
        "quoted-printable" => {
            if is_quoted_printable(&content) {
                trace!("[decode] filename={} is quoted-printable", attachment.filename);
                Box::new(QuotedPrintableReader::new(Cursor::new(content)))
            } else {
                warn!(
                    "[decode] filename={} claims quoted-printable but is not, passing through raw",
                    attachment.filename
                );
                Box::new(Cursor::new(content))
            }
        }
        "base64" => {
            if is_base64(&content) {
                trace!("[decode] filename={} is base64", attachment.filename);
                Box::new(DecoderReader::new(
                    SkipWhitespace::new(Cursor::new(content)),
                    &BASE64_ENGINE,
                ))
            } else {
                warn!(
                    "[decode] filename={} claims base64 but is not, passing through raw",
                    attachment.filename
                );
                Box::new(Cursor::new(content))
            }
        }
        _ => {
            trace!("[decode] filename={} has no transfer encoding", attachment.filename);
            Box::new(Cursor::new(content))
        }
    }
}

// ── Quoted-printable ──

/// Streaming quoted-printable decoder (RFC 2045 section 6.7).
///
/// Decodes one input line at a time. Malformed escapes and unescaped control
/// bytes are reported as `InvalidData` errors rather than repaired. Raw 8-bit
/// bytes are passed through as literals.
pub struct QuotedPrintableReader<R> {
    inner: R,
    line: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: BufRead> QuotedPrintableReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::new(),
            out: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        self.line.clear();
        self.out.clear();
        self.pos = 0;
        if self.inner.read_until(b'\n', &mut self.line)? == 0 {
            self.done = true;
            return Ok(());
        }
        decode_line(&self.line, &mut self.out)
    }
}

impl<R: BufRead> Read for QuotedPrintableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.out.len() {
            if self.done {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn decode_line(line: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
    let (body, ending) = if let Some(body) = line.strip_suffix(b"\r\n") {
        (body, &b"\r\n"[..])
    } else if let Some(body) = line.strip_suffix(b"\n") {
        (body, &b"\n"[..])
    } else {
        (line, &b""[..])
    };

    // Trailing whitespace is transport padding.
    let end = body
        .iter()
        .rposition(|b| *b != b' ' && *b != b'\t')
        .map_or(0, |i| i + 1);
    let body = &body[..end];

    let (content, soft_break) = match body.strip_suffix(b"=") {
        Some(content) => (content, true),
        None => (body, false),
    };
    if soft_break && ending.is_empty() && content.is_empty() {
        return Err(invalid("dangling '=' at end of input"));
    }

    let mut i = 0;
    while i < content.len() {
        match content[i] {
            b'=' => {
                let hi = content.get(i + 1).and_then(|b| hex_value(*b));
                let lo = content.get(i + 2).and_then(|b| hex_value(*b));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                    _ => return Err(invalid("invalid escape sequence after '='")),
                }
                i += 3;
            }
            b @ (b'\t' | b'\r' | b' '..=b'~' | 0x80..=0xff) => {
                out.push(b);
                i += 1;
            }
            b => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("quoted-printable: unescaped byte 0x{:02x}", b),
                ))
            }
        }
    }

    if !soft_break {
        out.extend_from_slice(ending);
    }
    Ok(())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("quoted-printable: {}", msg))
}

// ── Base64 ──

/// Drops the line breaks MIME inserts into base64 bodies before they reach
/// the decoder.
struct SkipWhitespace<R> {
    inner: R,
}

impl<R: Read> SkipWhitespace<R> {
    fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for SkipWhitespace<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                if !buf[i].is_ascii_whitespace() {
                    buf[kept] = buf[i];
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}
