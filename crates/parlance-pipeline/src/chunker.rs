//! Clause-level chunking of streamed reply tokens.
//!
//! Synthesis sounds best on clause-sized spans, and sending spans as soon as
//! they complete is what lets audio start before generation finishes. Tokens
//! accumulate until a clause boundary (sentence punctuation, or a comma once
//! the span is long enough) or a hard length cap.

/// Characters that always end a clause.
const HARD_BOUNDARIES: [char; 4] = ['.', '!', '?', '\n'];

/// Characters that end a clause once enough text has accumulated.
const SOFT_BOUNDARIES: [char; 3] = [',', ';', ':'];

/// Minimum span length before a soft boundary triggers emission.
const SOFT_MIN_CHARS: usize = 24;

/// A span never grows past this, boundary or not.
const MAX_CHARS: usize = 120;

#[derive(Debug, Default)]
pub struct ClauseChunker {
    buf: String,
}

impl ClauseChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a token; returns a completed clause if one closed.
    pub fn push(&mut self, token: &str) -> Option<String> {
        self.buf.push_str(token);

        let trimmed_len = self.buf.trim().chars().count();
        let last = self.buf.trim_end().chars().last()?;

        let boundary = HARD_BOUNDARIES.contains(&last)
            || (SOFT_BOUNDARIES.contains(&last) && trimmed_len >= SOFT_MIN_CHARS)
            || trimmed_len >= MAX_CHARS;

        if boundary {
            self.take()
        } else {
            None
        }
    }

    /// Returns whatever is buffered, if anything. Called at end-of-reply.
    pub fn flush(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let span = self.buf.trim().to_string();
        self.buf.clear();
        if span.is_empty() {
            None
        } else {
            Some(span)
        }
    }
}
