//! Per-port accumulation buffer
//!
//! Bytes read from a port are appended here until a line terminator arrives or
//! the buffer fills up. Clearing only resets the length; stale bytes beyond it
//! are never read back.

/// Line terminator that completes a buffered line
pub const TERMINATOR: u8 = b'\n';

/// Fixed-capacity byte accumulator with line tracking
#[derive(Debug)]
pub struct LineBuffer {
    data: Box<[u8]>,
    len: usize,
    line_ready: bool,
}

impl LineBuffer {
    /// Create an empty buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            line_ready: false,
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Whether a terminator was appended since the last clear
    #[cfg(test)]
    pub fn line_ready(&self) -> bool {
        self.line_ready
    }

    /// Append one byte; returns `true` when the byte completed a line
    ///
    /// Callers must not push into a full buffer.
    pub fn push(&mut self, byte: u8) -> bool {
        debug_assert!(!self.is_full(), "push into a full LineBuffer");
        self.data[self.len] = byte;
        self.len += 1;
        if byte == TERMINATOR {
            self.line_ready = true;
        }
        self.line_ready
    }

    /// Whether reading should pause until the next flush
    pub fn holds_complete_block(&self) -> bool {
        self.is_full() || self.line_ready
    }

    /// Flush eligibility
    ///
    /// A full buffer or a completed line always qualifies. With `eager` set
    /// (character mode, or a forced flush at shutdown) any pending byte does.
    pub fn flush_due(&self, eager: bool) -> bool {
        !self.is_empty() && (self.holds_complete_block() || eager)
    }

    /// Whether the held bytes lack a trailing terminator
    pub fn needs_terminator(&self) -> bool {
        self.contents().last().is_some_and(|&b| b != TERMINATOR)
    }

    pub fn contents(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Logically empty the buffer
    pub fn clear(&mut self) {
        self.len = 0;
        self.line_ready = false;
    }
}
