//! Append-only audit store
//!
//! Entries are written as canonical JSON lines into one segment per UTC day.
//! Appends never propagate errors: a failed write is reported through
//! `tracing` and the caller carries on. Verification and query read the
//! persisted segments back and share no state with the writer.
//!
//! Query is a full linear scan over every segment with no index. That is fine
//! for audit retention windows of weeks; long retention needs an index or
//! date-bounded scans.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::audit::{LogEntry, LogLevel};
use crate::audit_verifier::{verify_reader, VerifySummary};
use crate::clock::{Clock, SystemClock};
use crate::config::AuditConfig;
use crate::crypto::CryptoEngine;
use crate::errors::{AuditError, AuditResult};
use crate::log_sink::{entry_line, EntrySink};
use crate::storage::{segment_name, LocalDirStorage, SegmentStorage};

/// Size past which a write-once segment is sealed.
pub const SEAL_THRESHOLD_BYTES: u64 = 10_000_000;

/// Conjunctive filter over the queryable keys; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub event_type: Option<String>,
    pub level: Option<LogLevel>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }
        eq(&self.event_type, &entry.event_type)
            && self.level.map_or(true, |l| l == entry.level)
            && eq(&self.session_id, &entry.session_id)
            && eq(&self.user_id, &entry.user_id)
    }
}

pub struct AppendOnlyStore {
    storage: Box<dyn SegmentStorage>,
    crypto: Arc<CryptoEngine>,
    clock: Arc<dyn Clock>,
    write_once: bool,
    seal_threshold: u64,
}

impl AppendOnlyStore {
    pub fn new(storage: Box<dyn SegmentStorage>, crypto: Arc<CryptoEngine>) -> Self {
        Self {
            storage,
            crypto,
            clock: Arc::new(SystemClock),
            write_once: false,
            seal_threshold: SEAL_THRESHOLD_BYTES,
        }
    }

    /// Store over `config.log_dir`, creating the directory.
    pub fn open(config: &AuditConfig, crypto: Arc<CryptoEngine>) -> AuditResult<Self> {
        let storage = LocalDirStorage::new(&config.log_dir).map_err(|e| {
            AuditError::io(format!("creating {}", config.log_dir.display()), e)
        })?;
        Ok(Self::new(Box::new(storage), crypto).with_write_once(config.write_once))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_write_once(mut self, write_once: bool) -> Self {
        self.write_once = write_once;
        self
    }

    pub fn with_seal_threshold(mut self, bytes: u64) -> Self {
        self.seal_threshold = bytes;
        self
    }

    pub fn storage(&self) -> &dyn SegmentStorage {
        self.storage.as_ref()
    }

    /// Segment that an append made now would go to.
    pub fn current_segment(&self) -> String {
        segment_name(self.clock.now().date_naive())
    }

    /// Append one entry to today's segment. Failures are logged, not returned.
    pub fn append(&self, entry: &LogEntry) {
        if let Err(e) = self.try_append(entry) {
            tracing::error!(
                event_type = %entry.event_type,
                correlation_id = %entry.correlation_id,
                error = %e,
                "failed to persist audit entry"
            );
        }
    }

    pub fn try_append(&self, entry: &LogEntry) -> AuditResult<()> {
        let segment = self.current_segment();
        let line = entry_line(entry)?;
        let size = self
            .storage
            .append_line(&segment, &line)
            .map_err(|e| AuditError::io(format!("appending to {}", self.storage.locate(&segment)), e))?;

        if self.write_once && size > self.seal_threshold {
            match self.storage.seal(&segment) {
                Ok(()) => tracing::info!(
                    segment = %self.storage.locate(&segment),
                    size,
                    "sealed audit segment read-only"
                ),
                Err(e) => tracing::warn!(
                    segment = %self.storage.locate(&segment),
                    error = %e,
                    "could not seal audit segment"
                ),
            }
        }
        Ok(())
    }

    /// `true` when every signed line in the file at `path` verifies.
    pub fn verify_integrity(&self, path: impl AsRef<Path>) -> bool {
        match self.verify_integrity_detailed(path) {
            Ok(_) => true,
            Err(e) if e.is_integrity_failure() => false,
            Err(e) => {
                tracing::error!(error = %e, "audit integrity check could not run");
                false
            }
        }
    }

    pub fn verify_integrity_detailed(&self, path: impl AsRef<Path>) -> AuditResult<VerifySummary> {
        let path = path.as_ref();
        let location = path.display().to_string();
        let file = File::open(path).map_err(|e| AuditError::io(format!("opening {location}"), e))?;
        verify_reader(BufReader::new(file), &location, &self.crypto)
    }

    pub fn verify_segment(&self, segment: &str) -> AuditResult<VerifySummary> {
        let location = self.storage.locate(segment);
        let reader = self
            .storage
            .open_segment(segment)
            .map_err(|e| AuditError::io(format!("opening {location}"), e))?;
        verify_reader(reader, &location, &self.crypto)
    }

    /// Verify every segment oldest first, stopping at the first failure.
    pub fn verify_all(&self) -> AuditResult<Vec<VerifySummary>> {
        let segments = self
            .storage
            .segments()
            .map_err(|e| AuditError::io("listing audit segments", e))?;
        segments
            .iter()
            .map(|segment| self.verify_segment(segment))
            .collect()
    }

    /// Matching entries in segment order, then line order.
    pub fn query(&self, filter: &QueryFilter) -> Vec<LogEntry> {
        let segments = match self.storage.segments() {
            Ok(segments) => segments,
            Err(e) => {
                tracing::error!(error = %e, "failed to list audit segments");
                return Vec::new();
            }
        };

        let mut results = Vec::new();
        for segment in &segments {
            match self.storage.open_segment(segment) {
                Ok(reader) => self.scan_segment(reader, segment, filter, &mut results),
                Err(e) => tracing::error!(
                    segment = %self.storage.locate(segment),
                    error = %e,
                    "failed to open audit segment"
                ),
            }
        }
        results
    }

    fn scan_segment(
        &self,
        mut reader: Box<dyn BufRead + Send>,
        segment: &str,
        filter: &QueryFilter,
        results: &mut Vec<LogEntry>,
    ) {
        let mut buf = String::new();
        let mut line_number = 0usize;
        loop {
            buf.clear();
            line_number += 1;
            match reader.read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        segment = %self.storage.locate(segment),
                        line = line_number,
                        error = %e,
                        "stopped reading audit segment"
                    );
                    break;
                }
            }
            let line = buf.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => {
                    if filter.matches(&entry) {
                        results.push(entry);
                    }
                }
                Err(e) => {
                    let partial = !buf.ends_with('\n');
                    tracing::warn!(
                        segment = %self.storage.locate(segment),
                        line = line_number,
                        partial,
                        error = %e,
                        "skipping unreadable audit line"
                    );
                }
            }
        }
    }
}

impl EntrySink for AppendOnlyStore {
    fn emit(&self, entry: &LogEntry) -> AuditResult<()> {
        self.try_append(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SourceLocation;
    use crate::clock::FixedClock;
    use crate::storage::NoopGuard;
    use chrono::{TimeZone, Utc};
    use serde_json::Map;
    use tempfile::TempDir;

    fn entry(event_type: &str, user: &str, level: LogLevel) -> LogEntry {
        LogEntry::new(
            Utc::now(),
            level,
            event_type,
            "sess-1",
            "agent",
            user,
            "req-aaaaaaaaa".into(),
            "test",
            SourceLocation::new("t.rs", 1),
            Map::new(),
        )
    }

    fn store(tmp: &TempDir) -> (AppendOnlyStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        ));
        let storage = LocalDirStorage::with_guard(tmp.path(), Box::new(NoopGuard)).unwrap();
        let crypto = Arc::new(CryptoEngine::with_keys([1u8; 32], [2u8; 32]).unwrap());
        let store = AppendOnlyStore::new(Box::new(storage), crypto).with_clock(clock.clone());
        (store, clock)
    }

    #[test]
    fn test_append_goes_to_utc_day_segment() {
        let tmp = TempDir::new().unwrap();
        let (store, _) = store(&tmp);
        assert_eq!(store.current_segment(), "audit-2026-01-15.jsonl");
        store.append(&entry("LOGIN", "u", LogLevel::Info));
        store.append(&entry("LOGOUT", "u", LogLevel::Info));

        let text = std::fs::read_to_string(tmp.path().join("audit-2026-01-15.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""event_type":"LOGIN""#));
        assert!(lines[1].contains(r#""event_type":"LOGOUT""#));
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let filter = QueryFilter::new().event_type("LOGIN").user_id("alice");
        assert!(filter.matches(&entry("LOGIN", "alice", LogLevel::Info)));
        assert!(!filter.matches(&entry("LOGIN", "bob", LogLevel::Info)));
        assert!(!filter.matches(&entry("LOGOUT", "alice", LogLevel::Info)));
        assert!(QueryFilter::new().matches(&entry("ANY", "x", LogLevel::Critical)));
        assert!(!QueryFilter::new()
            .level(LogLevel::Error)
            .matches(&entry("ANY", "x", LogLevel::Warn)));
    }

    #[test]
    fn test_query_skips_foreign_lines() {
        let tmp = TempDir::new().unwrap();
        let (store, _) = store(&tmp);
        store.append(&entry("LOGIN", "u", LogLevel::Info));
        store
            .storage()
            .append_line("audit-2026-01-15.jsonl", r#"{"unrelated":true}"#)
            .unwrap();
        store.append(&entry("LOGIN", "u", LogLevel::Info));
        assert_eq!(store.query(&QueryFilter::new()).len(), 2);
    }

    #[test]
    fn test_query_returns_lines_without_signature_or_encrypted_fields() {
        let tmp = TempDir::new().unwrap();
        let (store, _) = store(&tmp);
        let mut bare = serde_json::to_value(entry("LOGIN", "legacy", LogLevel::Info)).unwrap();
        let object = bare.as_object_mut().unwrap();
        object.remove("hmac_signature");
        object.remove("encrypted_fields");
        store
            .storage()
            .append_line("audit-2026-01-15.jsonl", &bare.to_string())
            .unwrap();

        let found = store.query(&QueryFilter::new().user_id("legacy"));
        assert_eq!(found.len(), 1);
        assert!(!found[0].is_signed());
        assert!(found[0].encrypted_fields.is_empty());
        assert!(store.verify_all().is_ok());
    }

    #[test]
    fn test_missing_file_fails_verification() {
        let tmp = TempDir::new().unwrap();
        let (store, _) = store(&tmp);
        assert!(!store.verify_integrity(tmp.path().join("audit-1999-01-01.jsonl")));
        assert!(matches!(
            store.verify_integrity_detailed(tmp.path().join("nope")),
            Err(AuditError::Io { .. })
        ));
    }

    #[test]
    fn test_sealing_only_past_threshold_in_write_once_mode() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingGuard(Arc<AtomicUsize>);
        impl crate::storage::ImmutabilityGuard for CountingGuard {
            fn seal(&self, _path: &Path) -> std::io::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn is_sealed(&self, _path: &Path) -> std::io::Result<bool> {
                Ok(false)
            }
        }

        let tmp = TempDir::new().unwrap();
        let seals = Arc::new(AtomicUsize::new(0));
        let storage =
            LocalDirStorage::with_guard(tmp.path(), Box::new(CountingGuard(seals.clone()))).unwrap();
        let crypto = Arc::new(CryptoEngine::with_keys([1u8; 32], [2u8; 32]).unwrap());
        let line_len = entry_line(&entry("E", "u", LogLevel::Info)).unwrap().len() as u64 + 1;

        let relaxed = AppendOnlyStore::new(Box::new(storage), crypto.clone())
            .with_seal_threshold(line_len);
        relaxed.append(&entry("E", "u", LogLevel::Info));
        relaxed.append(&entry("E", "u", LogLevel::Info));
        assert_eq!(seals.load(Ordering::SeqCst), 0);

        let storage =
            LocalDirStorage::with_guard(tmp.path().join("worm"), Box::new(CountingGuard(seals.clone())))
                .unwrap();
        let worm = AppendOnlyStore::new(Box::new(storage), crypto)
            .with_write_once(true)
            .with_seal_threshold(line_len);
        worm.append(&entry("E", "u", LogLevel::Info));
        assert_eq!(seals.load(Ordering::SeqCst), 0);
        worm.append(&entry("E", "u", LogLevel::Info));
        assert_eq!(seals.load(Ordering::SeqCst), 1);
    }
}
