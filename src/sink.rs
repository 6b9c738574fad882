use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Timestamp layout of debug log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Error returned when a debug log entry could not be written.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The log file could not be opened for appending.
    #[error("could not open log file {path}: {source}")]
    Open {
        /// Configured log file
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
    /// The entry could not be written.
    #[error("could not write log entry: {0}")]
    Write(#[source] io::Error),
}

/// Append-only destination for debug log entries.
///
/// Entries are only written when the connector runs with `debug` enabled.
/// A failing sink never changes how a request is handled.
pub trait LogSink {
    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the entry could not be stored.
    fn append(&self, message: &str) -> Result<(), SinkError>;
}

/// Formats one debug log line: `YYYY-MM-DD HH:MM:SS\t<message>\n`.
pub fn format_entry(timestamp: &chrono::DateTime<chrono::Local>, message: &str) -> String {
    format!("{}\t{}\n", timestamp.format(TIMESTAMP_FORMAT), message.trim_end_matches('\n'))
}

/// Debug log file.
///
/// The file is opened in append mode for every entry and closed right
/// after, so no handle outlives the request that wrote it.
#[derive(Debug, Clone)]
pub struct FileLog {
    path: PathBuf,
}

impl FileLog {
    /// Creates a sink for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the target file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLog {
    fn append(&self, message: &str) -> Result<(), SinkError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SinkError::Open {
                path: self.path.clone(),
                source,
            })?;

        file.write_all(format_entry(&chrono::Local::now(), message).as_bytes())
            .map_err(SinkError::Write)
    }
}

/// A sink that collects entries in memory.
///
/// Useful for tests and for hosts that forward entries elsewhere.
///
/// # Examples
///
/// ```
/// use shadowd_connector::{LogSink, MemoryLog};
///
/// let log = MemoryLog::new();
/// log.append("shadowd: removed threat from client: 10.0.0.1").unwrap();
///
/// assert_eq!(log.len(), 1);
/// assert!(log.entries()[0].contains("10.0.0.1"));
/// ```
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: RefCell<Vec<String>>,
}

impl MemoryLog {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns `true` if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Returns a copy of all entries.
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}

impl LogSink for MemoryLog {
    fn append(&self, message: &str) -> Result<(), SinkError> {
        self.entries.borrow_mut().push(message.to_string());
        Ok(())
    }
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLog;

impl LogSink for NullLog {
    fn append(&self, _message: &str) -> Result<(), SinkError> {
        Ok(())
    }
}
