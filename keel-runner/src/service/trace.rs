//! Build trace sink
//!
//! Collects everything a build prints, in execution order: echoed commands,
//! captured process and container output, and markers such as `TIMEOUT`.
//! Raw bytes are normalized to UTF-8 on the way in.

use std::sync::{Arc, Mutex};

/// Sink for build output
pub trait OutputSink: Send + Sync {
    /// Appends text to the trace
    fn append_str(&self, text: &str);

    /// Appends a raw output chunk, replacing invalid UTF-8 sequences
    fn append_bytes(&self, chunk: &[u8]) {
        self.append_str(&String::from_utf8_lossy(chunk));
    }

    /// Returns the full trace accumulated so far
    fn contents(&self) -> String;
}

/// In-memory implementation of OutputSink
///
/// Cloning shares the underlying buffer.
#[derive(Clone, Default)]
pub struct InMemoryTrace {
    buffer: Arc<Mutex<String>>,
}

impl InMemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for InMemoryTrace {
    fn append_str(&self, text: &str) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push_str(text);
    }

    fn contents(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_in_order() {
        let trace = InMemoryTrace::new();
        trace.append_str("\necho ok\n");
        trace.append_bytes(b"ok\n");

        assert_eq!(trace.contents(), "\necho ok\nok\n");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let trace = InMemoryTrace::new();
        trace.append_bytes(&[b'a', 0xff, b'b']);

        assert_eq!(trace.contents(), "a\u{fffd}b");
    }

    #[test]
    fn test_clones_share_buffer() {
        let trace = InMemoryTrace::new();
        let other = trace.clone();
        other.append_str("shared");

        assert_eq!(trace.contents(), "shared");
    }
}
