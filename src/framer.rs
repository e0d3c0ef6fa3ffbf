//! DATA phase framing: end-of-data detection, size limit and transparency.

use bytes::{Buf, BytesMut};

const TERMINATOR: &[u8] = b"\r\n.\r\n";

/// Result of feeding bytes to the framer.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// More input is needed.
    Pending,
    /// The terminator was seen. `message` is de-stuffed; `rest` holds bytes
    /// received after the terminator, which belong to command mode.
    Complete { message: Vec<u8>, rest: BytesMut },
    /// The message grew past the configured maximum. Reported once; the
    /// framer then discards input until the terminator.
    TooLarge,
    /// The terminator of an oversized message was seen. `rest` belongs to
    /// command mode.
    Discarded { rest: BytesMut },
}

/// Accumulates a message body until `CRLF . CRLF`.
///
/// The buffer starts with the CRLF that ended the DATA command line, so a
/// terminator at the very start of the body (an empty message) is found
/// like any other.
#[derive(Debug)]
pub struct DataFramer {
    buf: BytesMut,
    max_size: usize,
    scanned: usize,
    overflowed: bool,
}

impl DataFramer {
    pub fn new(max_size: usize) -> Self {
        let mut buf = BytesMut::with_capacity(8 * 1024);
        buf.extend_from_slice(b"\r\n");
        Self {
            buf,
            max_size,
            scanned: 0,
            overflowed: false,
        }
    }

    /// Body bytes received so far, not counting the implicit leading CRLF.
    pub fn len(&self) -> usize {
        self.buf.len().saturating_sub(2)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Frame {
        self.buf.extend_from_slice(chunk);

        if let Some(pos) = find(&self.buf[self.scanned..], TERMINATOR) {
            let end = self.scanned + pos;
            // Body excludes the CRLF that starts the terminator.
            let body_len = end.saturating_sub(2);
            if !self.overflowed && body_len > self.max_size {
                // Leave `scanned` alone so the next call finds the terminator again.
                self.overflowed = true;
                return Frame::TooLarge;
            }
            let mut buf = std::mem::take(&mut self.buf);
            let raw = buf.split_to(end);
            buf.advance(TERMINATOR.len());
            if self.overflowed {
                return Frame::Discarded { rest: buf };
            }
            return Frame::Complete {
                message: unstuff(raw.get(2..).unwrap_or_default()),
                rest: buf,
            };
        }

        if self.overflowed {
            // Keep just enough for a terminator straddling two chunks.
            let excess = self.buf.len().saturating_sub(TERMINATOR.len() - 1);
            self.buf.advance(excess);
            self.scanned = 0;
            return Frame::Pending;
        }
        // The terminator may straddle two chunks.
        self.scanned = self.buf.len().saturating_sub(TERMINATOR.len() - 1);
        // A trailing partial terminator is not body yet.
        let pending = self.len().saturating_sub(partial_terminator(&self.buf));
        if pending > self.max_size {
            self.overflowed = true;
            return Frame::TooLarge;
        }
        Frame::Pending
    }
}

/// Undoes SMTP transparency (RFC 5321 section 4.5.2): a line starting with
/// `..` loses its first dot. Lines start at offset 0 and after every CRLF.
#[must_use]
pub fn unstuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut line_start = true;
    let mut i = 0;
    while i < data.len() {
        if line_start && data[i..].starts_with(b"..") {
            i += 1;
        }
        line_start = data[i..].starts_with(b"\r\n");
        if line_start {
            out.extend_from_slice(b"\r\n");
            i += 2;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Length of the longest suffix of `buf` that could start a terminator.
fn partial_terminator(buf: &[u8]) -> usize {
    (1..TERMINATOR.len())
        .rev()
        .find(|&n| buf.ends_with(&TERMINATOR[..n]))
        .unwrap_or(0)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
