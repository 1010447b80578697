//! The executor's end-of-build summary.

/// What a single [`crate::Executor::run`] call did, serialisable for the
/// `--json` CLI flag.
#[derive(Debug, Default, serde::Serialize)]
pub struct ExecutionReport {
    /// Commands that were outdated and actually ran.
    pub executed: usize,
    /// Commands that storage reported fresh and were not re-run.
    pub skipped: usize,
    /// Formatted failure messages, one per failed command (spec §7's
    /// `command failed: <name>:\n...` format).
    pub errors: Vec<String>,
    /// Total build wall-clock time, in milliseconds.
    pub wall_time_ms: u64,
}

impl ExecutionReport {
    /// Whether the build should be considered to have failed overall.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}
