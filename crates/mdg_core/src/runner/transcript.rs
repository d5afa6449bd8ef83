//! Captured child output with a trimmed excerpt for error reporting.
//!
//! The full transcript is retained for diagnostic logs; only the excerpt
//! (the last few non-empty lines) travels inside an error.

/// All output lines of one stage invocation, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one line of output.
    pub fn record(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The full transcript as a single newline-joined string.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// The last `max_lines` non-empty lines, joined with newlines.
    pub fn excerpt(&self, max_lines: usize) -> String {
        let mut tail: Vec<&str> = self
            .lines
            .iter()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(max_lines)
            .map(|l| l.trim_end())
            .collect();
        tail.reverse();
        tail.join("\n")
    }
}
