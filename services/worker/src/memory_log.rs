//! In-memory log capture for Slack alerts.
//!
//! A second tracing layer writes formatted events into a shared buffer; the
//! worker clears it per task and attaches the content to failure alerts.

use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

/// Shared, clearable log buffer.
#[derive(Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the captured log.
    pub fn clear(&self) {
        self.inner.lock().expect("log buffer poisoned").clear();
    }

    /// Captured log content.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().expect("log buffer poisoned")).into_owned()
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter {
            inner: self.inner.clone(),
        }
    }
}

pub struct BufferWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .expect("log buffer poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn captures_and_clears() {
        let buffer = LogBuffer::new();
        let mut writer = buffer.make_writer();
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();
        assert_eq!(buffer.contents(), "first line\nsecond line\n");

        buffer.clear();
        assert!(buffer.contents().is_empty());

        let mut writer = buffer.make_writer();
        writer.write_all(b"after clear\n").unwrap();
        assert_eq!(buffer.contents(), "after clear\n");
    }
}
