//! Sandbox output framing.
//!
//! Sandboxes deliver their combined stdout/stderr as arbitrary byte chunks:
//! one read may carry several lines, a partial line, or both. [`LineSplitter`]
//! reassembles chunks into lines in emission order, and
//! [`control_command`] recognises the control lines scripts emit to announce
//! the external commands they run.

use std::collections::VecDeque;

/// Prefix that marks a control line in sandbox output.
pub const CONTROL_MARKER: &str = "##";

/// Return the command announced by a control line, if `line` is one.
///
/// The marker is stripped and surrounding whitespace trimmed, so
/// `"## bowtie2 --version"` yields `"bowtie2 --version"`.
pub fn control_command(line: &str) -> Option<&str> {
    line.strip_prefix(CONTROL_MARKER).map(str::trim)
}

/// Reassembles byte chunks into complete lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, in order.
    ///
    /// Line terminators (`\n`, optionally preceded by `\r`) are removed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(Self::decode(&self.pending));
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush the trailing partial line, if any, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = Self::decode(&self.pending);
        self.pending.clear();
        Some(line)
    }

    fn decode(bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Bounded buffer of the most recent output lines, used for failure
/// diagnostics.
#[derive(Debug)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// The retained lines joined with newlines.
    pub fn render(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_marker_is_stripped() {
        assert_eq!(control_command("## bowtie2 --version"), Some("bowtie2 --version"));
        assert_eq!(control_command("##kallisto quant"), Some("kallisto quant"));
    }

    #[test]
    fn non_control_lines_are_ignored() {
        assert_eq!(control_command("# process started"), None);
        assert_eq!(control_command("sample1: 100 reads"), None);
        assert_eq!(control_command(" ## indented"), None);
    }

    #[test]
    fn multi_line_chunk_splits_in_order() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"one\ntwo\nthree\n");
        assert_eq!(lines, ["one", "two", "three"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn partial_lines_are_joined_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"## bowt"), Vec::<String>::new());
        assert_eq!(splitter.push(b"ie2 --version\nnext"), ["## bowtie2 --version"]);
        assert_eq!(splitter.finish().as_deref(), Some("next"));
    }

    #[test]
    fn carriage_returns_are_dropped() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"dos line\r\n"), ["dos line"]);
    }

    #[test]
    fn empty_lines_are_preserved() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"a\n\nb\n"), ["a", "", "b"]);
    }

    #[test]
    fn tail_keeps_most_recent_lines() {
        let mut tail = OutputTail::new(2);
        tail.push("first");
        tail.push("second");
        tail.push("third");
        assert_eq!(tail.render(), "second\nthird");
    }

    #[test]
    fn zero_capacity_tail_is_empty() {
        let mut tail = OutputTail::new(0);
        tail.push("ignored");
        assert_eq!(tail.render(), "");
    }
}
