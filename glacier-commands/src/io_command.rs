//! Commands with declared input/output file sets, a cached persisted
//! hash, and (for [`crate::compile`]'s subclasses) implicit inputs
//! recovered from compiler output.
//!
//! Grounded on `io_command` in the original build tool's command header:
//! a [`RawCommand`] plus the bookkeeping the command DAG and the
//! persisted database need — `inputs`/`outputs`/`implicit_inputs`,
//! `always`, a lazily computed hash, and the "saved command" shell script
//! feature.

use {
    crate::{
        error::CommandError,
        raw::{CapturedStreams, ExitOutcome, RawCommand, StreamEndpoint},
    },
    glacier_core::{CommandStorage, OutdatednessReason},
    glacier_reactor::Reactor,
    glacier_util::{hash::CommandHashBuilder, Path},
    std::{cell::Cell, fs, io, rc::Rc},
};

/// One gate shared by a family of commands: spawning one decrements it,
/// its completion hook increments it back. Lets a collaborator cap, say,
/// "at most 2 linker invocations at a time" independently of the
/// executor's overall concurrency bound.
pub type SimultaneousJobs = Rc<Cell<usize>>;

/// A [`RawCommand`] with declared inputs/outputs and a persisted hash.
///
/// `inputs`/`outputs`/`implicit_inputs` together with [`hash`][Self::hash]
/// are everything the command database and the DAG need; everything else
/// (argv, streams, time limit) lives on the embedded [`RawCommand`].
pub struct IoCommand {
    /// The underlying process invocation.
    pub raw: RawCommand,
    /// Force this command to run even if storage reports it as fresh.
    pub always: bool,
    /// Files read before the command can run; matched against peers'
    /// `outputs` to build the DAG.
    pub inputs: Vec<Path>,
    /// Files this command produces. Must be disjoint from every other
    /// command's `outputs` in the same build.
    pub outputs: Vec<Path>,
    /// Files discovered to have been read, after a successful run (e.g.
    /// transitively included headers). Empty until [`run`][Self::run]
    /// completes.
    pub implicit_inputs: Vec<Path>,
    /// A human-readable name, shown in progress logs. Falls back to the
    /// rendered output list, then to the argv itself.
    pub name: Option<String>,
    /// An optional shared concurrency gate (see [`SimultaneousJobs`]).
    pub simultaneous_jobs: Option<SimultaneousJobs>,
    hash_cache: Cell<Option<u64>>,
}

/// What came out of running an [`IoCommand`] to completion.
pub struct IoCommandOutcome {
    /// How the underlying process exited.
    pub exit: ExitOutcome,
    /// Streams captured via [`StreamEndpoint::Captured`].
    pub captured: CapturedStreams,
    /// `Err` once the exit/capture state above has been classified as a
    /// failure, carrying the spec's user-visible failure message.
    pub result: Result<(), CommandError>,
}

impl IoCommand {
    /// Wrap a bare process invocation with no declared inputs/outputs.
    pub fn new(raw: RawCommand) -> Self {
        Self {
            raw,
            always: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            implicit_inputs: Vec::new(),
            name: None,
            simultaneous_jobs: None,
            hash_cache: Cell::new(None),
        }
    }

    /// Declare one input file.
    pub fn input(mut self, path: impl Into<Path>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Declare one output file.
    pub fn output(mut self, path: impl Into<Path>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Set a human-readable name for progress logs and error messages.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Force this command to always be considered outdated.
    pub fn always(mut self, always: bool) -> Self {
        self.always = always;
        self
    }

    /// The command's stable 64-bit fingerprint (see spec §4.5), computed
    /// on first call and cached for the life of the command.
    pub fn hash(&self) -> u64 {
        if let Some(cached) = self.hash_cache.get() {
            return cached;
        }
        let mut builder = CommandHashBuilder::new();
        for argument in &self.raw.arguments {
            builder.put_argument(argument);
        }
        builder.put_cwd(&self.raw.cwd);
        for (key, value) in &self.raw.environment {
            builder.put_env(key, value);
        }
        for endpoint in [&self.raw.stdin, &self.raw.stdout, &self.raw.stderr] {
            if let StreamEndpoint::File(path) = endpoint {
                builder.put_redirect(path);
            }
        }
        let hash = builder.finish();
        self.hash_cache.set(Some(hash));
        hash
    }

    /// A human-readable name: the explicit one if set, otherwise the
    /// rendered output list, otherwise the argv itself.
    pub fn name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if !self.outputs.is_empty() {
            let rendered: Vec<String> = self.outputs.iter().map(|p| format!("\"{p}\"")).collect();
            return format!("generating: {}", rendered.join(", "));
        }
        self.raw.display_name()
    }

    /// Whether the command must run: `always` short-circuits to "yes
    /// (treat it as a new command)"; otherwise storage is consulted.
    /// Matches spec §4.4: "returns false iff `always=false` AND the
    /// storage reports `Fresh`".
    pub fn outdated(&self, storage: &mut CommandStorage) -> OutdatednessReason {
        if self.always {
            return OutdatednessReason::NewCommand;
        }
        storage.outdated(self.hash())
    }

    /// Spawn the command, registering it with `reactor`. `on_complete`
    /// fires once, with the exit outcome classified against spec §7's
    /// failure format — non-zero exit or a signal becomes `Err`, success
    /// is `Ok(())`. Implicit-dependency harvesting for compile commands
    /// happens in [`crate::compile`], layered on top of this.
    pub fn run(
        self,
        reactor: &mut dyn Reactor,
        on_complete: impl FnOnce(IoCommandOutcome) + 'static,
    ) -> Result<CapturedStreams, CommandError> {
        let name = self.name();
        let time_limit = self.raw.time_limit;

        // `on_exit` must be constructed before `spawn` hands back the
        // captured-stream buffers it allocates, but it only actually runs
        // once the reactor later observes the process has exited — by
        // then the slot below has long since been filled in.
        let captured_slot: Rc<std::cell::RefCell<Option<CapturedStreams>>> = Rc::new(std::cell::RefCell::new(None));
        let captured_slot_for_exit = captured_slot.clone();
        let captured = self.raw.spawn(reactor, move |exit| {
            let captured = captured_slot_for_exit
                .borrow_mut()
                .take()
                .expect("captured streams set before the exit callback runs");
            let result = classify(&name, time_limit, &exit, &captured);
            on_complete(IoCommandOutcome { exit, captured, result });
        })?;
        *captured_slot.borrow_mut() = Some(captured.clone());
        Ok(captured)
    }

    /// Produce the `<workdir>/rsp/<hash><ext>` saved-command script for
    /// this invocation (spec §6's optional "saved-command script"
    /// feature): a self-contained shell/batch reproduction of cwd, env,
    /// and argv, one argument per continuation line.
    pub fn save(&self, dir: impl AsRef<std::path::Path>) -> io::Result<std::path::PathBuf> {
        let dialect = ShellDialect::detect();
        let file_name = format!("{:x}{}", self.hash(), dialect.extension());
        let path = dir.as_ref().join(file_name);

        let mut script = String::new();
        script.push_str(dialect.prolog());
        script.push_str(&format!("echo {}\n\n", self.name()));
        if self.raw.cwd.as_str() != "." {
            script.push_str(&format!("cd \"{}\"\n\n", self.raw.cwd));
        }

        let mut parts = Vec::with_capacity(self.raw.arguments.len() + 1);
        parts.push(quote_arg(self.raw.program.as_str()));
        for argument in &self.raw.arguments {
            parts.push(quote_arg(argument.as_str()));
        }
        let delim = dialect.arg_delim();
        let indent = "    ";
        script.push_str(&parts.join(&format!(" {delim}\n{indent}")));
        script.push('\n');
        script.push_str(dialect.epilog());

        fs::create_dir_all(dir.as_ref())?;
        fs::write(&path, script)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            fs::set_permissions(&path, perms)?;
        }
        Ok(path)
    }
}

fn quote_arg(s: &str) -> String {
    format!("\"{s}\"")
}

fn classify(
    name: &str,
    time_limit: Option<std::time::Duration>,
    exit: &ExitOutcome,
    captured: &CapturedStreams,
) -> Result<(), CommandError> {
    if exit.timed_out {
        let limit = time_limit.unwrap_or_default();
        return Err(CommandError::TimedOut { name: name.to_owned(), limit });
    }
    if let Some(signal) = exit.signal {
        let text = render_captured(captured);
        return Err(CommandError::Signal { name: name.to_owned(), signal, captured: text });
    }
    match exit.exit_code {
        Some(0) => Ok(()),
        Some(code) => {
            let text = render_captured(captured);
            Err(CommandError::ExitCode { name: name.to_owned(), code, captured: text })
        }
        None => {
            let text = render_captured(captured);
            Err(CommandError::ExitCode { name: name.to_owned(), code: -1, captured: text })
        }
    }
}

fn render_captured(captured: &CapturedStreams) -> String {
    let stderr = captured.stderr.borrow();
    let text = if !stderr.is_empty() { &*stderr } else { &*captured.stdout.borrow() };
    String::from_utf8_lossy(text).into_owned()
}

/// The per-OS shell conventions the "save command" feature writes against
/// (spec §3's `{cmd, sh}` shell-script dialect sum type).
#[derive(Clone, Copy)]
pub enum ShellDialect {
    /// Windows `cmd.exe` batch files.
    Cmd,
    /// POSIX `sh` scripts.
    Sh,
}

impl ShellDialect {
    /// The dialect matching the host OS.
    pub fn detect() -> Self {
        if cfg!(windows) {
            ShellDialect::Cmd
        } else {
            ShellDialect::Sh
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ShellDialect::Cmd => ".bat",
            ShellDialect::Sh => ".sh",
        }
    }

    fn prolog(self) -> &'static str {
        match self {
            ShellDialect::Cmd => "@echo off\n\nsetlocal\n\n",
            ShellDialect::Sh => "#!/bin/sh\n\n",
        }
    }

    fn epilog(self) -> &'static str {
        match self {
            ShellDialect::Cmd => {
                "if %ERRORLEVEL% NEQ 0 echo Error code: %ERRORLEVEL% && exit /b %ERRORLEVEL%\n"
            }
            ShellDialect::Sh => "E=$?\nif [ $E -ne 0 ]; then echo \"Error code: $E\"; fi\n",
        }
    }

    fn arg_delim(self) -> &'static str {
        match self {
            ShellDialect::Cmd => "^",
            ShellDialect::Sh => "\\",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IoCommand {
        IoCommand::new(RawCommand::new("cc").arg("-c")).input("a.c").output("a.o")
    }

    #[test]
    fn hash_is_deterministic_and_cached() {
        let c = sample();
        let h1 = c.hash();
        let h2 = c.hash();
        assert_eq!(h1, h2);
    }

    #[test]
    fn always_forces_new_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = CommandStorage::open(dir.path()).unwrap();
        let c = sample().always(true);
        storage.add(c.hash(), u64::MAX, vec![], vec![]).unwrap();
        assert_eq!(c.outdated(&mut storage), OutdatednessReason::NewCommand);
    }

    #[test]
    fn name_falls_back_to_outputs_then_argv() {
        let named = sample();
        assert!(named.name().contains("a.o"));

        let bare = IoCommand::new(RawCommand::new("cc").arg("--version"));
        assert!(bare.name().contains("--version"));
    }
}
