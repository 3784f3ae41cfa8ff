//! Newline-delimited chunk decoding.
//!
//! Network reads do not respect record boundaries: one read can carry several
//! records, half a record, or half of a multi-byte character. The decoder keeps
//! the unterminated tail as raw bytes and only decodes complete lines.

use crate::error::StreamError;

/// Splits a byte stream into trimmed, non-empty text lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
    scanned: usize,
}

impl LineDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer the next chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Take the next complete line, if one is buffered.
    ///
    /// Lines are handed out one at a time so a bad line never costs the
    /// lines before it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] if the line is not valid UTF-8. The
    /// bad line is consumed; later lines stay available.
    pub fn next_line(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            // Bytes before `scanned` are known to hold no newline.
            let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = self.pending.len();
                return Ok(None);
            };
            let end = self.scanned + offset;
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            self.scanned = 0;
            if let Some(line) = decode_line(raw)? {
                return Ok(Some(line));
            }
        }
    }

    /// Flush the unterminated tail at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] if the tail is not valid UTF-8.
    pub fn finish(&mut self) -> Result<Option<String>, StreamError> {
        self.scanned = 0;
        decode_line(std::mem::take(&mut self.pending))
    }

    /// Number of buffered bytes not yet terminated by a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(raw: Vec<u8>) -> Result<Option<String>, StreamError> {
    let text = String::from_utf8(raw)?;
    let line = text.trim();
    if line.is_empty() {
        Ok(None)
    } else {
        Ok(Some(line.to_string()))
    }
}
