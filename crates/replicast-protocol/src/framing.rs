//! Receive-side framing.
//!
//! TCP delivers a byte stream, not messages: one read may hold half a line
//! or several lines. [`LineAssembler`] buffers bytes and releases lines only
//! once the buffered text ends exactly at a terminator, then hands back
//! every line at once, in order.

use crate::codec::TERMINATOR;

/// Accumulates received bytes into complete lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns the complete lines, if any.
    ///
    /// Bytes are decoded one byte per character. Nothing is returned while
    /// the buffer ends mid-line, even if it already holds complete lines
    /// before the partial one; they are released together with it once a
    /// later chunk finishes the line. Empty lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().map(|&byte| char::from(byte)));
        if !self.buffer.ends_with(TERMINATOR) {
            return Vec::new();
        }

        let lines = self
            .buffer
            .split(TERMINATOR)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        self.buffer.clear();
        lines
    }

    /// Number of buffered characters not yet released.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any buffered partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
