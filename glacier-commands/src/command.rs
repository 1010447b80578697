//! The tagged union the DAG and executor dispatch over.
//!
//! Spec §9: "commands expose a capability set {hash, outdated, run,
//! process_deps, name, get_error_message, save}; concrete variants are
//! raw, io, msvc_compile, gcc_compile. No inheritance chain is required;
//! tagged variants with a thin dispatch layer suffice." [`IoCommand`]
//! already covers `raw`+`io`; this enum adds the thin dispatch layer
//! across it and the two compile subclasses.

use {
    crate::{
        compile::{CompileOutcome, GccCompileCommand, MsvcCompileCommand},
        error::CommandError,
        io_command::IoCommand,
        raw::{CapturedStreams, ExitOutcome},
    },
    glacier_core::{CommandStorage, OutdatednessReason},
    glacier_reactor::Reactor,
    glacier_util::Path,
};

/// Every command kind `glacier-exec`'s scheduler can run.
pub enum Command {
    /// A command with no implicit-dependency recovery.
    Io(IoCommand),
    /// An MSVC (`cl.exe`) compile: recovers implicit inputs from
    /// `/showIncludes`.
    Msvc(MsvcCompileCommand),
    /// A GCC/Clang compile: recovers implicit inputs from a `-MD` deps
    /// file.
    Gcc(GccCompileCommand),
}

/// What came out of running any [`Command`] variant, normalised to one
/// shape regardless of which kind ran.
pub struct CommandOutcome {
    /// How the underlying process exited.
    pub exit: ExitOutcome,
    /// Headers discovered to have been read, for compile variants; always
    /// empty for [`Command::Io`].
    pub implicit_inputs: Vec<Path>,
    /// `Err` with the spec §7 failure message on failure.
    pub result: Result<(), CommandError>,
}

impl Command {
    /// Borrow the underlying declared-inputs/outputs command common to
    /// every variant.
    pub fn io(&self) -> &IoCommand {
        match self {
            Command::Io(c) => c,
            Command::Msvc(c) => &c.io,
            Command::Gcc(c) => &c.io,
        }
    }

    /// Mutably borrow the underlying declared-inputs/outputs command.
    pub fn io_mut(&mut self) -> &mut IoCommand {
        match self {
            Command::Io(c) => c,
            Command::Msvc(c) => &mut c.io,
            Command::Gcc(c) => &mut c.io,
        }
    }

    /// The command's stable 64-bit fingerprint.
    pub fn hash(&self) -> u64 {
        self.io().hash()
    }

    /// A human-readable name for progress logs.
    pub fn name(&self) -> String {
        self.io().name()
    }

    /// Whether storage reports this command as needing to run.
    pub fn outdated(&self, storage: &mut CommandStorage) -> OutdatednessReason {
        self.io().outdated(storage)
    }

    /// Dispatch to the variant's own `run`, normalising the result.
    pub fn run(
        self,
        reactor: &mut dyn Reactor,
        on_complete: impl FnOnce(CommandOutcome) + 'static,
    ) -> Result<CapturedStreams, CommandError> {
        match self {
            Command::Io(c) => c.run(reactor, move |outcome| {
                on_complete(CommandOutcome {
                    exit: outcome.exit,
                    implicit_inputs: Vec::new(),
                    result: outcome.result,
                });
            }),
            Command::Msvc(c) => c.run(reactor, move |outcome: CompileOutcome| {
                on_complete(CommandOutcome {
                    exit: outcome.exit,
                    implicit_inputs: outcome.implicit_inputs,
                    result: outcome.result,
                });
            }),
            Command::Gcc(c) => c.run(reactor, move |outcome: CompileOutcome| {
                on_complete(CommandOutcome {
                    exit: outcome.exit,
                    implicit_inputs: outcome.implicit_inputs,
                    result: outcome.result,
                });
            }),
        }
    }
}

impl From<IoCommand> for Command {
    fn from(c: IoCommand) -> Self {
        Command::Io(c)
    }
}

impl From<MsvcCompileCommand> for Command {
    fn from(c: MsvcCompileCommand) -> Self {
        Command::Msvc(c)
    }
}

impl From<GccCompileCommand> for Command {
    fn from(c: GccCompileCommand) -> Self {
        Command::Gcc(c)
    }
}
