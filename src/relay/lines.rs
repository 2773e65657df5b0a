//! Incremental line splitter for the upstream's line-delimited stream.

use crate::error::RelayError;

/// Accumulates response chunks and yields complete lines as they appear.
///
/// Lines end at `\n`; a trailing `\r` is dropped. Invalid UTF-8 is replaced
/// rather than rejected. Empty lines are yielded like any other line.
#[derive(Debug)]
pub struct LineDecoder {
    pending: Vec<u8>,
    max_line: usize,
}

impl LineDecoder {
    pub fn new(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
        }
    }

    /// Feed one chunk, returning every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, RelayError> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            self.check_len()?;
            lines.push(self.take_line());
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        self.check_len()?;
        Ok(lines)
    }

    /// Flush the final unterminated line at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn take_line(&mut self) -> String {
        let mut raw = std::mem::take(&mut self.pending);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }

    fn check_len(&self) -> Result<(), RelayError> {
        if self.pending.len() > self.max_line {
            return Err(RelayError::UpstreamRead {
                message: format!("line exceeds {} bytes", self.max_line),
            });
        }
        Ok(())
    }
}
