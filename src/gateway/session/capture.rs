//! Bounded output capture.

/// Collects stdout and stderr up to a per-stream cap.
///
/// Bytes past the cap are discarded and `truncated` is set. The remote
/// process keeps running; only the timeout stops it.
#[derive(Debug)]
pub struct CaptureBuffer {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CaptureBuffer {
    /// Pre-allocates a small buffer per stream; growth is bounded by `cap`.
    pub fn new(cap: usize) -> Self {
        Self {
            stdout: Vec::with_capacity(cap.min(4096)),
            stderr: Vec::with_capacity(cap.min(1024)),
            cap,
            truncated: false,
        }
    }

    pub fn push_stdout(&mut self, data: &[u8]) {
        self.truncated |= append_capped(&mut self.stdout, data, self.cap);
    }

    pub fn push_stderr(&mut self, data: &[u8]) {
        self.truncated |= append_capped(&mut self.stderr, data, self.cap);
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Decode both streams, replacing invalid UTF-8.
    pub fn into_strings(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }
}

/// Returns whether anything was dropped.
fn append_capped(buffer: &mut Vec<u8>, data: &[u8], cap: usize) -> bool {
    let room = cap.saturating_sub(buffer.len());
    let take = room.min(data.len());
    buffer.extend_from_slice(&data[..take]);
    take < data.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_cap_keeps_everything() {
        let mut buffer = CaptureBuffer::new(16);
        buffer.push_stdout(b"hello");
        buffer.push_stdout(b" world");
        buffer.push_stderr(b"warn");
        assert!(!buffer.truncated());
        assert_eq!(buffer.into_strings(), ("hello world".to_string(), "warn".to_string()));
    }

    #[test]
    fn test_exactly_at_cap_is_not_truncated() {
        let mut buffer = CaptureBuffer::new(4);
        buffer.push_stdout(b"abcd");
        assert!(!buffer.truncated());
        assert_eq!(buffer.stdout, b"abcd");
    }

    #[test]
    fn test_over_cap_truncates_and_discards() {
        let mut buffer = CaptureBuffer::new(4);
        buffer.push_stdout(b"abc");
        buffer.push_stdout(b"defgh");
        buffer.push_stdout(b"more");
        assert!(buffer.truncated());
        assert_eq!(buffer.stdout, b"abcd");
    }

    #[test]
    fn test_streams_capped_independently() {
        let mut buffer = CaptureBuffer::new(3);
        buffer.push_stderr(b"errors!");
        buffer.push_stdout(b"ok");
        assert!(buffer.truncated());
        assert_eq!(buffer.stdout, b"ok");
        assert_eq!(buffer.stderr, b"err");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buffer = CaptureBuffer::new(16);
        buffer.push_stdout(&[0x66, 0x6f, 0xff, 0x6f]);
        let (stdout, _) = buffer.into_strings();
        assert_eq!(stdout, "fo\u{fffd}o");
    }
}
