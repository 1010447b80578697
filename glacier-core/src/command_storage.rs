//! Persistent record of past successful runs, and the outdatedness query.

use {
    crate::{
        file_registry::FileRegistry,
        outdated::OutdatednessReason,
        record::{CommandRecord, FileRecord},
        stream::RecordStream,
    },
    glacier_util::Path,
    std::{collections::HashMap, io, path::Path as StdPath},
};

/// The on-disk schema version. Bumping this invalidates the existing
/// store: a mismatched directory is simply empty from this process's point
/// of view, so every command looks like [`OutdatednessReason::NewCommand`].
pub const SCHEMA_VERSION: &str = "9";

/// The two append-only streams under `<workdir>/db/<version>/`, replayed
/// into an in-memory index on open, plus the file registry they populate.
pub struct CommandStorage {
    commands: RecordStream,
    files: RecordStream,
    by_command_hash: HashMap<u64, CommandRecord>,
    registry: FileRegistry,
}

impl CommandStorage {
    /// Open (creating if necessary) the command database under `workdir`.
    pub fn open(workdir: impl AsRef<StdPath>) -> io::Result<Self> {
        let db_dir = workdir.as_ref().join("db").join(SCHEMA_VERSION);
        std::fs::create_dir_all(&db_dir)?;

        let commands = RecordStream::open(db_dir.join("commands.bin"))?;
        let files = RecordStream::open(db_dir.join("commands.files.bin"))?;

        let mut registry = FileRegistry::new();
        for bytes in files.iter() {
            if let Some(FileRecord(path)) = FileRecord::decode(bytes) {
                registry.register_from_storage(Path::from(path.as_str()));
            } else {
                tracing::warn!("ignoring corrupt entry in commands.files.bin");
            }
        }

        let mut by_command_hash = HashMap::new();
        for bytes in commands.iter() {
            match CommandRecord::decode(bytes) {
                Some(record) => { by_command_hash.insert(record.command_hash, record); }
                None => tracing::warn!("ignoring corrupt entry in commands.bin"),
            }
        }

        Ok(Self { commands, files, by_command_hash, registry })
    }

    /// The file registry backing this store's outdatedness queries.
    pub fn registry(&mut self) -> &mut FileRegistry {
        &mut self.registry
    }

    /// Decide whether the command with this hash needs to run again.
    ///
    /// See spec §4.7: no record at all is [`NewCommand`][OutdatednessReason::NewCommand];
    /// otherwise every file hash in the record is resolved through the
    /// file registry and checked against the record's `end_mtime`.
    pub fn outdated(&mut self, command_hash: u64) -> OutdatednessReason {
        let Some(record) = self.by_command_hash.get(&command_hash) else {
            return OutdatednessReason::NewCommand;
        };
        let end_mtime_nanos = record.end_mtime_nanos;

        for &file_hash in &record.file_hashes.clone() {
            let Some(entry) = self.registry.check(file_hash) else {
                return OutdatednessReason::NotRecordedFile(file_hash);
            };
            match entry.exists() {
                Some(true) => {
                    if entry.mtime_nanos().expect("checked and exists") > end_mtime_nanos {
                        return OutdatednessReason::UpdatedFile(file_hash);
                    }
                }
                _ => return OutdatednessReason::MissingFile(file_hash),
            }
        }

        OutdatednessReason::Fresh
    }

    /// Append a record of a successful run: every path in `inputs` (which
    /// should already cover declared inputs, implicit inputs, and
    /// outputs) is registered and, for previously-unseen paths, appended
    /// to the file stream; output paths additionally have their cached
    /// stat invalidated so the next build re-stats them.
    pub fn add(
        &mut self,
        command_hash: u64,
        end_mtime_nanos: u64,
        inputs: impl IntoIterator<Item = Path>,
        outputs: impl IntoIterator<Item = Path>,
    ) -> io::Result<()> {
        let mut file_hashes = Vec::new();

        for path in inputs {
            file_hashes.push(self.intern(path)?);
        }
        for path in outputs {
            let hash = self.intern(path)?;
            self.registry.invalidate(hash);
            file_hashes.push(hash);
        }

        let record = CommandRecord { command_hash, end_mtime_nanos, file_hashes };
        self.commands.write_record(&record.encode())?;
        self.by_command_hash.insert(command_hash, record);
        Ok(())
    }

    fn intern(&mut self, path: Path) -> io::Result<u64> {
        let text = path.as_str().to_owned();
        let (hash, first) = self.registry.register(path);
        if first {
            self.files.write_record(&FileRecord(text).encode())?;
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_hash_is_new_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = CommandStorage::open(dir.path()).unwrap();
        assert_eq!(storage.outdated(42), OutdatednessReason::NewCommand);
    }

    #[test]
    fn fresh_after_recording_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.c");
        std::fs::write(&input, b"int main(){}").unwrap();

        let mut storage = CommandStorage::open(dir.path()).unwrap();
        let end_mtime = u64::MAX; // after any mtime the test file could have
        storage.add(1, end_mtime, vec![Path::from(input.as_path())], vec![]).unwrap();

        assert_eq!(storage.outdated(1), OutdatednessReason::Fresh);
    }

    #[test]
    fn missing_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.c");
        std::fs::write(&input, b"int main(){}").unwrap();

        let mut storage = CommandStorage::open(dir.path()).unwrap();
        storage.add(1, u64::MAX, vec![Path::from(input.as_path())], vec![]).unwrap();
        std::fs::remove_file(&input).unwrap();
        storage.registry().invalidate(crate::file_registry::hash_path(&Path::from(input.as_path())));

        match storage.outdated(1) {
            OutdatednessReason::MissingFile(_) => {}
            other => panic!("expected MissingFile, got {other:?}"),
        }
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.c");
        std::fs::write(&input, b"int main(){}").unwrap();

        {
            let mut storage = CommandStorage::open(dir.path()).unwrap();
            storage.add(7, u64::MAX, vec![Path::from(input.as_path())], vec![]).unwrap();
        }

        let mut storage = CommandStorage::open(dir.path()).unwrap();
        assert_eq!(storage.outdated(7), OutdatednessReason::Fresh);
    }
}
