//! Chunk-boundary line buffering for child process output.
//!
//! pip and ffmpeg rewrite their status lines in place with a bare `\r`,
//! so `\n`, `\r\n`, and `\r` are all treated as line terminators. The
//! trailing partial segment of a chunk is retained until the next chunk
//! (or end of stream) completes it.

/// Incremental line splitter over raw byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' => {
                    if self.last_was_cr {
                        // \r\n: the \r already terminated this line
                        self.last_was_cr = false;
                    } else {
                        lines.push(self.take_pending());
                    }
                }
                b'\r' => {
                    lines.push(self.take_pending());
                    self.last_was_cr = true;
                }
                _ => {
                    self.last_was_cr = false;
                    self.pending.push(byte);
                }
            }
        }
        lines
    }

    /// Flush the trailing partial line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_pending())
        }
    }

    fn take_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}
