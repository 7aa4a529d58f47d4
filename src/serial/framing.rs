//! Newline framing for the raw serial byte stream.
//!
//! Bytes are buffered until `\n`; a trailing `\r` is dropped with it.
//! Partial lines survive across reads, so the reader can be cancelled
//! between reads without losing data.

/// Longest line kept before it is force-emitted; the rest of that line is
/// discarded up to the next `\n`
pub const MAX_LINE_BYTES: usize = 4096;

/// Accumulates bytes and emits complete lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            discarding: false,
        }
    }

    /// Feed a chunk; returns every line completed by it
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if self.discarding {
                self.discarding = b != b'\n';
                continue;
            }
            if b == b'\n' {
                lines.push(self.take_line());
                continue;
            }
            self.buffer.push(b);
            if self.buffer.len() >= MAX_LINE_BYTES {
                lines.push(self.take_line());
                self.discarding = true;
            }
        }
        lines
    }

    /// Bytes of the incomplete line still buffered
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial line (e.g. after the link was lost)
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    fn take_line(&mut self) -> String {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        line
    }
}
