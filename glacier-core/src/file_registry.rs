//! Process-wide interned file table with lazy stat+mtime caching.
//!
//! Modelled as a handle the executor owns and threads through the DAG and
//! command storage, rather than a `static` — a single build's reactor is
//! single-threaded, so a shared, globally-reachable table buys nothing here
//! and only makes the engine harder to run twice in one process (e.g. in
//! tests).

use {
    glacier_util::{hash::Blake3, Path},
    std::{collections::HashMap, time::UNIX_EPOCH},
};

/// A lazily-stat'd, interned file.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub path: Path,
    stat: Option<Stat>,
}

#[derive(Clone, Copy, Debug)]
struct Stat {
    exists: bool,
    mtime_nanos: u64,
}

impl FileEntry {
    /// Whether the file exists on disk, as of the last [`check`][Self::check].
    pub fn exists(&self) -> Option<bool> {
        self.stat.map(|s| s.exists)
    }

    /// The file's mtime in nanoseconds since the Unix epoch, as of the last
    /// [`check`][Self::check]; `None` if never checked or missing.
    pub fn mtime_nanos(&self) -> Option<u64> {
        self.stat.filter(|s| s.exists).map(|s| s.mtime_nanos)
    }
}

/// Hash a normalised path the same way the command hash does, so a file's
/// key is stable across the path's lifetime in the table.
pub fn hash_path(path: &Path) -> u64 {
    Blake3::new().put_str(path.as_str()).finalize().to_u64()
}

/// The process-wide (well: per-build) file table.
#[derive(Default)]
pub struct FileRegistry {
    entries: HashMap<u64, FileEntry>,
}

impl FileRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `path` if its hash is not already present; return the hash
    /// and whether this was the first time the path was seen.
    pub fn register(&mut self, path: Path) -> (u64, bool) {
        let hash = hash_path(&path);
        let first = !self.entries.contains_key(&hash);
        self.entries.entry(hash).or_insert_with(|| FileEntry { path, stat: None });
        (hash, first)
    }

    /// Insert a path replayed from the persisted file stream at open,
    /// without performing a stat (done lazily on first query).
    pub fn register_from_storage(&mut self, path: Path) {
        let hash = hash_path(&path);
        self.entries.entry(hash).or_insert_with(|| FileEntry { path, stat: None });
    }

    /// Look up an already-registered entry by hash.
    pub fn get(&self, hash: u64) -> Option<&FileEntry> {
        self.entries.get(&hash)
    }

    /// Stat the file if it has not already been stat'd this build, caching
    /// the result, then return the cached entry.
    pub fn check(&mut self, hash: u64) -> Option<&FileEntry> {
        let entry = self.entries.get_mut(&hash)?;
        if entry.stat.is_none() {
            entry.stat = Some(stat(&entry.path));
        }
        Some(entry)
    }

    /// Force the next [`check`][Self::check] to re-stat the file.
    ///
    /// Called when a command declares the path as one of its outputs,
    /// since the command's run is expected to have changed it.
    pub fn invalidate(&mut self, hash: u64) {
        if let Some(entry) = self.entries.get_mut(&hash) {
            entry.stat = None;
        }
    }
}

fn stat(path: &Path) -> Stat {
    match std::fs::metadata(path.to_os_path()) {
        Ok(metadata) => {
            let mtime_nanos = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            Stat { exists: true, mtime_nanos }
        }
        Err(_) => Stat { exists: false, mtime_nanos: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_reports_first_insertion() {
        let mut registry = FileRegistry::new();
        let (h1, first1) = registry.register(Path::from("a.c"));
        let (h2, first2) = registry.register(Path::from("a.c"));
        assert_eq!(h1, h2);
        assert!(first1);
        assert!(!first2);
    }

    #[test]
    fn check_detects_missing_file() {
        let mut registry = FileRegistry::new();
        let (hash, _) = registry.register(Path::from("/nonexistent/path/for/glacier/tests"));
        let entry = registry.check(hash).unwrap();
        assert_eq!(entry.exists(), Some(false));
    }

    #[test]
    fn check_detects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("present.txt");
        std::fs::write(&file, b"hi").unwrap();

        let mut registry = FileRegistry::new();
        let (hash, _) = registry.register(Path::from(file.as_path()));
        let entry = registry.check(hash).unwrap();
        assert_eq!(entry.exists(), Some(true));
        assert!(entry.mtime_nanos().is_some());
    }

    #[test]
    fn invalidate_forces_restat() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.o");

        let mut registry = FileRegistry::new();
        let (hash, _) = registry.register(Path::from(file.as_path()));
        assert_eq!(registry.check(hash).unwrap().exists(), Some(false));

        std::fs::write(&file, b"now it exists").unwrap();
        registry.invalidate(hash);
        assert_eq!(registry.check(hash).unwrap().exists(), Some(true));
    }
}
