//! In-memory log sink for TUI mode
//!
//! tracing output written to stderr would tear the alternate screen, so in
//! TUI mode the fmt layer writes here and the log pane drains the lines.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

/// Lines kept between two drains; older ones are dropped.
const CAPACITY: usize = 500;

#[derive(Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Take everything buffered so far, oldest first.
    pub fn drain(&self) -> Vec<String> {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.drain(..).collect()
    }
}

/// Per-event writer; complete lines go to the buffer as they arrive.
pub struct LineWriter {
    buffer: LogBuffer,
    partial: Vec<u8>,
}

impl LineWriter {
    fn push_complete_lines(&mut self) {
        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=end).collect();
            self.buffer
                .push(String::from_utf8_lossy(&line[..end]).into_owned());
        }
    }
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.partial.extend_from_slice(buf);
        self.push_complete_lines();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            self.buffer.push(String::from_utf8_lossy(&rest).into_owned());
        }
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LineWriter {
            buffer: self.clone(),
            partial: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_lines_are_dropped() {
        let buffer = LogBuffer::new();
        for i in 0..CAPACITY + 20 {
            buffer.push(format!("line {}", i));
        }
        let lines = buffer.drain();
        assert_eq!(lines.len(), CAPACITY);
        assert_eq!(lines[0], "line 20");
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_writer_splits_lines_and_flushes_rest_on_drop() {
        let buffer = LogBuffer::new();
        {
            let mut writer = buffer.make_writer();
            write!(writer, "INFO connecting\nWARN device").unwrap();
            assert_eq!(buffer.drain(), vec!["INFO connecting"]);
        }
        assert_eq!(buffer.drain(), vec!["WARN device"]);
    }
}
