// Emission targets for finished entries
// A sink receives each entry exactly once, already encrypted and signed.

use std::io::Write;
use std::sync::Mutex;

use crate::audit::LogEntry;
use crate::canonicalize::canonical_json;
use crate::errors::{AuditError, AuditResult};

/// Destination for finished log entries.
pub trait EntrySink: Send + Sync {
    fn emit(&self, entry: &LogEntry) -> AuditResult<()>;
}

/// Canonical single-line JSON for an entry, without the trailing newline.
pub fn entry_line(entry: &LogEntry) -> AuditResult<String> {
    let value = serde_json::to_value(entry)
        .map_err(|e| AuditError::serialization("rendering log entry", e))?;
    Ok(canonical_json(&value))
}

/// Writes one JSON line per entry to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl EntrySink for StdoutSink {
    fn emit(&self, entry: &LogEntry) -> AuditResult<()> {
        let line = entry_line(entry)?;
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", line).map_err(|e| AuditError::io("writing entry to stdout", e))?;
        handle
            .flush()
            .map_err(|e| AuditError::io("flushing stdout", e))
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntrySink for MemorySink {
    fn emit(&self, entry: &LogEntry) -> AuditResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry.clone());
        Ok(())
    }
}

/// Fans one entry out to several sinks; every sink is tried.
pub struct TeeSink {
    sinks: Vec<std::sync::Arc<dyn EntrySink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn EntrySink>>) -> Self {
        Self { sinks }
    }
}

impl EntrySink for TeeSink {
    fn emit(&self, entry: &LogEntry) -> AuditResult<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(entry) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
