//! Segment storage for the append-only store
//!
//! A segment is one day file (`audit-YYYY-MM-DD.jsonl`). [`SegmentStorage`]
//! hides where segments live; [`LocalDirStorage`] keeps them in a directory.
//!
//! Write-once behaviour is delegated to an [`ImmutabilityGuard`]. The default
//! [`PermissionBitsGuard`] clears the write bits on a sealed file. That is
//! advisory hardening only: the owner or a privileged user can restore the
//! bits and edit the file. Tamper evidence comes from the entry signatures,
//! not from this guard.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const SEGMENT_PREFIX: &str = "audit-";
pub const SEGMENT_SUFFIX: &str = ".jsonl";

/// Makes a segment read-only once it is sealed.
pub trait ImmutabilityGuard: Send + Sync {
    fn seal(&self, path: &Path) -> io::Result<()>;

    fn is_sealed(&self, path: &Path) -> io::Result<bool>;
}

/// Clears write permission bits (mode `0o444`) on Unix.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionBitsGuard;

impl ImmutabilityGuard for PermissionBitsGuard {
    #[cfg(unix)]
    fn seal(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o444))
    }

    #[cfg(not(unix))]
    fn seal(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "permission-bit sealing needs a Unix platform",
        ))
    }

    #[cfg(unix)]
    fn is_sealed(&self, path: &Path) -> io::Result<bool> {
        use std::os::unix::fs::PermissionsExt;
        Ok(fs::metadata(path)?.permissions().mode() & 0o222 == 0)
    }

    #[cfg(not(unix))]
    fn is_sealed(&self, path: &Path) -> io::Result<bool> {
        Ok(fs::metadata(path)?.permissions().readonly())
    }
}

/// Never seals anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGuard;

impl ImmutabilityGuard for NoopGuard {
    fn seal(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn is_sealed(&self, _path: &Path) -> io::Result<bool> {
        Ok(false)
    }
}

pub trait SegmentStorage: Send + Sync {
    /// Append `line` plus a newline; returns the segment size afterwards.
    fn append_line(&self, segment: &str, line: &str) -> io::Result<u64>;

    /// Segment names in ascending order.
    fn segments(&self) -> io::Result<Vec<String>>;

    fn open_segment(&self, segment: &str) -> io::Result<Box<dyn BufRead + Send>>;

    fn seal(&self, segment: &str) -> io::Result<()>;

    fn is_sealed(&self, segment: &str) -> io::Result<bool>;

    /// Human-readable location for diagnostics.
    fn locate(&self, segment: &str) -> String;
}

pub fn segment_name(date: chrono::NaiveDate) -> String {
    format!("{}{}{}", SEGMENT_PREFIX, date.format("%Y-%m-%d"), SEGMENT_SUFFIX)
}

pub fn is_segment_name(name: &str) -> bool {
    name.strip_prefix(SEGMENT_PREFIX)
        .and_then(|rest| rest.strip_suffix(SEGMENT_SUFFIX))
        .map(|date| chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok())
        .unwrap_or(false)
}

/// Day files in a local directory. Each append opens, writes and closes the
/// file; no handle is held between calls.
pub struct LocalDirStorage {
    root: PathBuf,
    guard: Box<dyn ImmutabilityGuard>,
}

impl LocalDirStorage {
    /// Creates `root` if needed.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_guard(root, Box::new(PermissionBitsGuard))
    }

    pub fn with_guard(
        root: impl Into<PathBuf>,
        guard: Box<dyn ImmutabilityGuard>,
    ) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, guard })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, segment: &str) -> PathBuf {
        self.root.join(segment)
    }
}

impl SegmentStorage for LocalDirStorage {
    fn append_line(&self, segment: &str, line: &str) -> io::Result<u64> {
        let path = self.path_of(segment);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');
        // whole line in a single write
        file.write_all(record.as_bytes())?;
        file.flush()?;
        Ok(file.metadata()?.len())
    }

    fn segments(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for dirent in fs::read_dir(&self.root)? {
            let dirent = dirent?;
            if !dirent.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = dirent.file_name().to_str() {
                if is_segment_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn open_segment(&self, segment: &str) -> io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(self.path_of(segment))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn seal(&self, segment: &str) -> io::Result<()> {
        self.guard.seal(&self.path_of(segment))
    }

    fn is_sealed(&self, segment: &str) -> io::Result<bool> {
        self.guard.is_sealed(&self.path_of(segment))
    }

    fn locate(&self, segment: &str) -> String {
        self.path_of(segment).display().to_string()
    }
}
