//! Capture sinks
//!
//! A sink persists the header and every accepted data line of one capture
//! session. The engine only ever opens a sink for a label, appends lines and
//! closes it; naming and placing the destination is the sink's business.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File extension of capture files
pub const CAPTURE_EXTENSION: &str = "csv";

/// Sink error types
#[derive(Error, Debug)]
pub enum SinkError {
    /// Destination could not be created
    #[error("failed to open capture destination {destination}: {source}")]
    Open {
        /// Destination that failed
        destination: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Line could not be persisted
    #[error("failed to write to {destination}: {source}")]
    Write {
        /// Destination that failed
        destination: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Append after close
    #[error("capture destination {0} is closed")]
    Closed(String),

    /// Label cannot name a directory under the sink root
    #[error("label {0:?} is not usable as a directory name")]
    UnsafeLabel(String),
}

/// Factory for per-session writers
#[cfg_attr(test, mockall::automock)]
pub trait CaptureSink: Send {
    /// Open a destination for `label`, started at `started_at`
    fn open(&mut self, label: &str, started_at: DateTime<Local>) -> Result<Box<dyn SinkWriter>, SinkError>;
}

/// Append-only writer bound to one destination
#[cfg_attr(test, mockall::automock)]
pub trait SinkWriter: Send {
    /// Append one line (without terminator)
    fn append(&mut self, line: &str) -> Result<(), SinkError>;

    /// Flush and release the destination. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), SinkError>;

    /// Human readable destination
    fn destination(&self) -> String;
}

/// Generate capture filename with timestamp (`<label>_<YYYYmmdd_HHMMSS>.csv`)
pub fn generate_capture_filename(label: &str, started_at: DateTime<Local>) -> String {
    format!(
        "{}_{}.{}",
        label,
        started_at.format("%Y%m%d_%H%M%S"),
        CAPTURE_EXTENSION
    )
}

/// Writes each session to `<root>/<label>/<label>_<timestamp>.csv`
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    root: PathBuf,
}

impl CsvFileSink {
    /// Create a sink rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root output directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pick a path that doesn't clobber an earlier capture from the same second
    fn unique_path(dir: &Path, label: &str, started_at: DateTime<Local>) -> PathBuf {
        let candidate = dir.join(generate_capture_filename(label, started_at));
        if !candidate.exists() {
            return candidate;
        }

        let stem = format!("{}_{}", label, started_at.format("%Y%m%d_%H%M%S"));
        (1u32..)
            .map(|n| dir.join(format!("{stem}_{n}.{CAPTURE_EXTENSION}")))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

impl CaptureSink for CsvFileSink {
    fn open(&mut self, label: &str, started_at: DateTime<Local>) -> Result<Box<dyn SinkWriter>, SinkError> {
        // Exactly one plain component, so the capture stays under `root`
        let mut components = Path::new(label).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(SinkError::UnsafeLabel(label.to_string()));
        }

        let dir = self.root.join(label);
        fs::create_dir_all(&dir).map_err(|source| SinkError::Open {
            destination: dir.display().to_string(),
            source,
        })?;

        let path = Self::unique_path(&dir, label, started_at);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| SinkError::Open {
                destination: path.display().to_string(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "capture file created");
        Ok(Box::new(CsvFileWriter {
            writer: Some(BufWriter::new(file)),
            path,
            lines: 0,
        }))
    }
}

/// Writer for one capture file
#[derive(Debug)]
pub struct CsvFileWriter {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    lines: u64,
}

impl CsvFileWriter {
    /// Capture file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written so far
    pub fn lines(&self) -> u64 {
        self.lines
    }

    fn write_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Write {
            destination: self.path.display().to_string(),
            source,
        }
    }
}

impl SinkWriter for CsvFileWriter {
    fn append(&mut self, line: &str) -> Result<(), SinkError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SinkError::Closed(self.path.display().to_string()));
        };

        // Flushed per line: a crash or pulled cable must not lose buffered samples
        let result = writeln!(writer, "{line}").and_then(|()| writer.flush());
        result.map_err(|e| self.write_error(e))?;
        self.lines += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| self.write_error(e))?;
        }
        Ok(())
    }

    fn destination(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for CsvFileWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// One session recorded by a [`MemorySink`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryCapture {
    /// Label the sink was opened for
    pub label: String,
    /// Appended lines, header first
    pub lines: Vec<String>,
    /// Whether the writer was closed
    pub closed: bool,
}

#[derive(Debug, Default)]
struct MemoryRecord {
    captures: Vec<MemoryCapture>,
    appends: usize,
    fail_after: Option<usize>,
}

/// Sink that keeps everything in memory, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    record: Arc<Mutex<MemoryRecord>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every append once `n` appends have succeeded
    pub fn fail_appends_after(&self, n: usize) {
        self.record.lock().fail_after = Some(n);
    }

    /// Sessions opened so far
    pub fn captures(&self) -> Vec<MemoryCapture> {
        self.record.lock().captures.clone()
    }

    /// Number of opens
    pub fn opens(&self) -> usize {
        self.record.lock().captures.len()
    }

    /// Number of successful appends across all sessions
    pub fn appends(&self) -> usize {
        self.record.lock().appends
    }
}

impl CaptureSink for MemorySink {
    fn open(&mut self, label: &str, _started_at: DateTime<Local>) -> Result<Box<dyn SinkWriter>, SinkError> {
        let mut record = self.record.lock();
        record.captures.push(MemoryCapture {
            label: label.to_string(),
            ..MemoryCapture::default()
        });
        let index = record.captures.len() - 1;

        Ok(Box::new(MemoryWriter {
            record: Arc::clone(&self.record),
            index,
        }))
    }
}

struct MemoryWriter {
    record: Arc<Mutex<MemoryRecord>>,
    index: usize,
}

impl SinkWriter for MemoryWriter {
    fn append(&mut self, line: &str) -> Result<(), SinkError> {
        let mut record = self.record.lock();
        if record.captures[self.index].closed {
            return Err(SinkError::Closed(self.destination()));
        }
        if record.fail_after.is_some_and(|n| record.appends >= n) {
            return Err(SinkError::Write {
                destination: self.destination(),
                source: std::io::Error::other("injected write failure"),
            });
        }

        record.captures[self.index].lines.push(line.to_string());
        record.appends += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.record.lock().captures[self.index].closed = true;
        Ok(())
    }

    fn destination(&self) -> String {
        format!("memory:{}", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_filename() {
        assert_eq!(
            generate_capture_filename("normal", fixed_time()),
            "normal_20240309_140507.csv"
        );
    }

    #[test]
    fn test_csv_sink_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvFileSink::new(dir.path());

        let mut writer = sink.open("fall", fixed_time()).unwrap();
        writer.append("timestamp_ms,ax,ay,az").unwrap();
        writer.append("20,0.1,0.2,0.98").unwrap();
        writer.close().unwrap();

        let path = dir.path().join("fall").join("fall_20240309_140507.csv");
        assert_eq!(writer.destination(), path.display().to_string());
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "timestamp_ms,ax,ay,az\n20,0.1,0.2,0.98\n");
    }

    #[test]
    fn test_csv_sink_does_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvFileSink::new(dir.path());

        let mut first = sink.open("walk", fixed_time()).unwrap();
        let mut second = sink.open("walk", fixed_time()).unwrap();
        assert_ne!(first.destination(), second.destination());
        assert!(second.destination().ends_with("walk_20240309_140507_1.csv"));

        first.close().unwrap();
        second.close().unwrap();
    }

    #[test]
    fn test_csv_sink_keeps_captures_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("captures");
        let mut sink = CsvFileSink::new(&root);

        for label in ["../escape", "/tmp/escape", "a/b", "..", "."] {
            let err = sink.open(label, fixed_time()).err();
            assert!(
                matches!(err, Some(SinkError::UnsafeLabel(_))),
                "{label} should be rejected"
            );
        }
        assert!(!dir.path().join("escape").exists());
        assert!(!root.exists());

        assert!(sink.open("walk-2", fixed_time()).is_ok());
    }

    #[test]
    fn test_append_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvFileSink::new(dir.path());
        let mut writer = sink.open("x", fixed_time()).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();

        assert!(matches!(writer.append("1,2"), Err(SinkError::Closed(_))));
    }

    #[test]
    fn test_memory_sink_records() {
        let mut sink = MemorySink::new();
        let mut writer = sink.open("normal", fixed_time()).unwrap();
        writer.append("timestamp_ms").unwrap();
        writer.append("1").unwrap();
        writer.close().unwrap();

        let captures = sink.captures();
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].lines, vec!["timestamp_ms", "1"]);
        assert!(captures[0].closed);
        assert_eq!(sink.appends(), 2);
    }

    #[test]
    fn test_memory_sink_failure_injection() {
        let mut sink = MemorySink::new();
        sink.fail_appends_after(1);
        let mut writer = sink.open("normal", fixed_time()).unwrap();

        assert!(writer.append("timestamp_ms").is_ok());
        assert!(matches!(writer.append("1"), Err(SinkError::Write { .. })));
    }
}
