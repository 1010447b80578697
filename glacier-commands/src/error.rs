//! Errors raised while spawning or running a command.

use std::{io, time::Duration};

/// Everything that can go wrong running a command, accumulated by the
/// executor into its error list rather than aborting the whole build.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be spawned at all (missing executable, bad
    /// working directory, OS resource exhaustion).
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// The program path that failed to start.
        program: String,
        #[source]
        source: io::Error,
    },

    /// The command ran past its configured time limit and was killed.
    #[error("{name} timed out after {limit:?}")]
    TimedOut {
        /// The command's display name.
        name: String,
        /// The configured limit.
        limit: Duration,
    },

    /// The command exited with a non-zero status.
    #[error("command failed: {name}:\nprocess exit code: {code}\nerror:\n{captured}")]
    ExitCode {
        /// The command's display name.
        name: String,
        /// The process's exit code.
        code: i32,
        /// Captured stderr/stdout used to explain the failure.
        captured: String,
    },

    /// The command was terminated by a signal (Unix only).
    #[error("command failed: {name}:\nterminated by signal {signal}\nerror:\n{captured}")]
    Signal {
        /// The command's display name.
        name: String,
        /// The terminating signal number.
        signal: i32,
        /// Captured stderr/stdout used to explain the failure.
        captured: String,
    },

    /// A compile command's implicit-dependency output (`/showIncludes`
    /// text or a `.d` file) could not be parsed.
    #[error("failed to parse dependency output for {name}: {message}")]
    DependencyParse {
        /// The command's display name.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// An I/O failure unrelated to spawning (reading a `.d` file, etc).
    #[error(transparent)]
    Io(#[from] io::Error),
}
