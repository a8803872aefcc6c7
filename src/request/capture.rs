//! Rewindable scratch sinks for header and verbose capture.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use parking_lot::Mutex;

use crate::error::{BarrageError, Result};

/// An anonymous temporary file that a transport streams lines into.
///
/// Writes always append. Reads rewind to the start first, so the captured content can be fetched
/// any number of times. The file is removed by the OS when the sink is dropped.
#[derive(Debug)]
pub struct CaptureSink {
    file: Mutex<File>,
}

impl CaptureSink {
    /// Allocate a new sink backed by an anonymous temporary file.
    ///
    /// # Errors
    /// Returns [`BarrageError::ResourceExhausted`] if the temporary file cannot be created.
    pub fn new() -> Result<Self> {
        let file = tempfile::tempfile().map_err(BarrageError::ResourceExhausted)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one line to the sink.
    pub fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")
    }

    /// Read every trimmed, non-empty line from the start of the sink.
    pub fn read_lines(&self) -> Result<Vec<String>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;

        Ok(content
            .lines()
            .map(|line| line.trim_matches(['\r', '\n']).trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_can_be_read_repeatedly() {
        let sink = CaptureSink::new().unwrap();
        sink.write_line("HTTP/1.1 200 OK").unwrap();
        sink.write_line("content-type: text/plain\r").unwrap();

        let first = sink.read_lines().unwrap();
        let second = sink.read_lines().unwrap();
        assert_eq!(first, vec!["HTTP/1.1 200 OK", "content-type: text/plain"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_writes_after_read_append() {
        let sink = CaptureSink::new().unwrap();
        sink.write_line("first").unwrap();
        assert_eq!(sink.read_lines().unwrap(), vec!["first"]);

        sink.write_line("second").unwrap();
        assert_eq!(sink.read_lines().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let sink = CaptureSink::new().unwrap();
        sink.write_line("  ").unwrap();
        sink.write_line("").unwrap();
        sink.write_line(" kept ").unwrap();
        assert_eq!(sink.read_lines().unwrap(), vec!["kept"]);
    }
}
