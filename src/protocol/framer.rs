/// Reassembles newline-terminated lines from arbitrary byte chunks.
///
/// The buffer is bounded: bytes past the capacity are dropped until the next
/// `\n`, so an overlong line comes out truncated instead of stalling the
/// stream. A `\r` right before the terminator is stripped.
pub struct LineFramer {
    buffer: Vec<u8>,
    capacity: usize,
    truncated: bool,
}

/// Inbound line buffer size of the reference board link.
pub const DEFAULT_LINE_CAPACITY: usize = 256;

impl LineFramer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LINE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            truncated: false,
        }
    }

    /// Feed a chunk, calling `emit` once per completed line.
    pub fn push(&mut self, bytes: &[u8], mut emit: impl FnMut(&str)) {
        for &b in bytes {
            if b == b'\n' {
                if self.buffer.last() == Some(&b'\r') {
                    self.buffer.pop();
                }
                if self.truncated {
                    tracing::warn!(
                        "Inbound line exceeded {} bytes and was truncated",
                        self.capacity
                    );
                }
                let line = String::from_utf8_lossy(&self.buffer);
                emit(&line);
                self.buffer.clear();
                self.truncated = false;
            } else if self.buffer.len() < self.capacity {
                self.buffer.push(b);
            } else {
                self.truncated = true;
            }
        }
    }

    /// Bytes of the line currently being assembled.
    #[cfg(test)]
    fn partial(&self) -> &[u8] {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.truncated = false;
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(framer: &mut LineFramer, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        framer.push(bytes, |line| lines.push(line.to_string()));
        lines
    }

    #[test]
    fn splits_complete_lines() {
        let mut framer = LineFramer::new();
        let lines = collect(&mut framer, b"ok\nT:20.0 /0.0\n");
        assert_eq!(lines, ["ok", "T:20.0 /0.0"]);
        assert!(framer.partial().is_empty());
    }

    #[test]
    fn carries_partial_line_between_chunks() {
        let mut framer = LineFramer::new();
        assert!(collect(&mut framer, b"echo:bu").is_empty());
        assert_eq!(framer.partial(), b"echo:bu");
        assert_eq!(collect(&mut framer, b"sy: processing\nok"), ["echo:busy: processing"]);
        assert_eq!(collect(&mut framer, b"\n"), ["ok"]);
    }

    #[test]
    fn empty_chunk_emits_nothing() {
        let mut framer = LineFramer::new();
        assert!(collect(&mut framer, b"").is_empty());
    }

    #[test]
    fn strips_carriage_return() {
        let mut framer = LineFramer::new();
        assert_eq!(collect(&mut framer, b"ok\r\n\r\n"), ["ok", ""]);
    }

    #[test]
    fn truncates_overlong_line_and_recovers() {
        let mut framer = LineFramer::with_capacity(8);
        let lines = collect(&mut framer, b"0123456789ABCDEF\nok\n");
        assert_eq!(lines, ["01234567", "ok"]);
    }
}
