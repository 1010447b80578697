//! The outdatedness verdict for a single command.

/// Why a command must (or must not) be re-run.
///
/// `Fresh` means skip; every other variant means run, and carries enough
/// context (when `explain` is requested) to tell the user why.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OutdatednessReason {
    /// Nothing changed since the last successful run.
    Fresh,
    /// No record of this command's hash exists yet.
    NewCommand,
    /// A file is being registered for the first time in this process, with
    /// no prior persisted record at all (as opposed to [`NotRecordedFile`],
    /// a file hash that appears in an old command record but was since
    /// dropped from the file table).
    ///
    /// [`NotRecordedFile`]: Self::NotRecordedFile
    NewFile(u64),
    /// A file hash in the record is not (yet) known to the file registry.
    NotRecordedFile(u64),
    /// A declared or implicit input/output no longer exists on disk.
    MissingFile(u64),
    /// A declared or implicit input/output changed after the last run.
    UpdatedFile(u64),
}

impl OutdatednessReason {
    /// Whether the command must be re-run.
    pub fn is_outdated(&self) -> bool {
        !matches!(self, OutdatednessReason::Fresh)
    }
}
