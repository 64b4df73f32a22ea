//! Append-only observation stream.
//!
//! One JSON object per line. Every failure in here is swallowed: tracing is
//! best-effort and must never disturb the traced program.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::types::TraceRecord;

pub struct TraceSink {
    writer: Option<BufWriter<File>>,
    echo: bool,
    written: usize,
}

impl TraceSink {
    /// Opens `path` in append mode. With `echo` set, every record is also
    /// printed to stdout.
    pub fn to_path(path: &Path, echo: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            echo,
            written: 0,
        })
    }

    /// Sink with no backing file; observations still reach the run outcome.
    pub fn discard() -> Self {
        Self {
            writer: None,
            echo: false,
            written: 0,
        }
    }

    pub fn record(&mut self, record: &TraceRecord) {
        let Ok(line) = serde_json::to_string(record) else {
            return;
        };
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.write_all(line.as_bytes());
            let _ = writer.write_all(b"\n");
        }
        if self.echo {
            println!("[{}] {}", crate::transform::HOOK_NAME, line);
        }
        self.written += 1;
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

impl Drop for TraceSink {
    fn drop(&mut self) {
        self.close();
    }
}
