//! A bare external command: argv, environment, working directory, and
//! stream wiring, with no notion of declared inputs/outputs.

use {
    crate::error::CommandError,
    glacier_reactor::{ProcessHandle, Reactor},
    glacier_util::{Argument, Path},
    std::{cell::RefCell, rc::Rc, time::Duration},
};

/// Where one of a command's standard streams goes.
#[derive(Default)]
pub enum StreamEndpoint {
    /// Share the parent process's stream (the default).
    #[default]
    Inherit,
    /// Discard everything written (for stdout/stderr) or supply an
    /// immediate EOF (for stdin).
    Null,
    /// Capture to an in-memory buffer, made available through
    /// [`CapturedStreams`] once the command has been spawned.
    Captured,
    /// Invoke a callback for each chunk as it arrives, without separately
    /// retaining a full buffer. Used by the compile-command subclasses to
    /// scan output for implicit dependencies line by line.
    Tap(Box<dyn FnMut(&[u8])>),
    /// Redirect to or from a file.
    File(Path),
    /// Connect to the adjacent command's stream in a two-command
    /// pipeline. Only meaningful via [`crate::pipeline::spawn_pipeline`];
    /// spawning a command with this endpoint any other way is an error.
    PipePeer,
}

/// A command to run: argv, environment, working directory, stream wiring.
///
/// Mirrors the `raw_command` struct an `io_command` builds on: this type
/// carries no notion of declared inputs/outputs or a persisted hash, only
/// enough to actually spawn and observe a process.
pub struct RawCommand {
    /// The executable to run.
    pub program: Path,
    /// Arguments, *not* including argv\[0\].
    pub arguments: Vec<Argument>,
    /// The working directory to run in.
    pub cwd: Path,
    /// The *exact* environment given to the program; nothing is inherited
    /// implicitly.
    pub environment: Vec<(String, String)>,
    /// Where stdin comes from.
    pub stdin: StreamEndpoint,
    /// Where stdout goes.
    pub stdout: StreamEndpoint,
    /// Where stderr goes.
    pub stderr: StreamEndpoint,
    /// If set, the command is killed once it has used this much CPU time.
    pub time_limit: Option<Duration>,
    /// Fire-and-forget: report success as soon as the process is created,
    /// without waiting for it to exit.
    pub detach: bool,
    /// Replace the calling process's image instead of spawning a child.
    /// On Unix this is a direct `execve` with no `fork`; on Windows the
    /// new process is created normally and the caller exits right after.
    /// At most one of `detach`/`exec_replace` may be set.
    pub exec_replace: bool,
}

/// In-memory buffers fed by [`StreamEndpoint::Captured`] streams. Shared
/// with the reactor callbacks that append to them as data arrives.
#[derive(Clone, Default)]
pub struct CapturedStreams {
    /// Accumulated stdout, if [`StreamEndpoint::Captured`] was requested.
    pub stdout: Rc<RefCell<Vec<u8>>>,
    /// Accumulated stderr, if [`StreamEndpoint::Captured`] was requested.
    pub stderr: Rc<RefCell<Vec<u8>>>,
}

/// How a spawned command finished.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExitOutcome {
    /// The process's exit code, if it exited normally.
    pub exit_code: Option<i32>,
    /// The signal that killed it, if any (never set on Windows).
    pub signal: Option<i32>,
    /// Whether the command was killed for exceeding its time limit.
    pub timed_out: bool,
}

impl ExitOutcome {
    /// Whether the command completed successfully.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

impl RawCommand {
    /// Start building a command running `program`.
    pub fn new(program: impl Into<Path>) -> Self {
        Self {
            program: program.into(),
            arguments: Vec::new(),
            cwd: Path::from("."),
            environment: Vec::new(),
            stdin: StreamEndpoint::Inherit,
            stdout: StreamEndpoint::Inherit,
            stderr: StreamEndpoint::Inherit,
            time_limit: None,
            detach: false,
            exec_replace: false,
        }
    }

    /// Mark the command to be spawned fire-and-forget: success is reported
    /// as soon as it's created, without waiting for it to exit.
    pub fn detach(mut self, detach: bool) -> Self {
        assert!(!(detach && self.exec_replace), "a command cannot both detach and exec_replace");
        self.detach = detach;
        self
    }

    /// Mark the command to replace the calling process's image instead of
    /// being spawned as a child.
    pub fn exec_replace(mut self, exec_replace: bool) -> Self {
        assert!(!(exec_replace && self.detach), "a command cannot both detach and exec_replace");
        self.exec_replace = exec_replace;
        self
    }

    /// Append one argument.
    pub fn arg(mut self, argument: impl Into<Argument>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Append many arguments.
    pub fn args(mut self, arguments: impl IntoIterator<Item = Argument>) -> Self {
        self.arguments.extend(arguments);
        self
    }

    /// A human-readable rendering for logs and error messages: argv
    /// space-joined, quoting arguments that contain whitespace.
    pub fn display_name(&self) -> String {
        let mut s = String::new();
        push_quoted(&mut s, self.program.as_str());
        for argument in &self.arguments {
            s.push(' ');
            push_quoted(&mut s, argument.as_str());
        }
        s
    }

    /// Spawn the command, registering its streams and exit with `reactor`.
    /// Returns immediately; `on_exit` runs once the reactor observes the
    /// process has terminated.
    pub fn spawn(
        self,
        reactor: &mut dyn Reactor,
        on_exit: impl FnOnce(ExitOutcome) + 'static,
    ) -> Result<CapturedStreams, CommandError> {
        sys::spawn(self, reactor, on_exit)
    }

    /// Spawn the command on a fresh, private reactor and block the calling
    /// thread until it exits. Used for one-off probes (the MSVC
    /// localisation prefix discovery) that have no business sharing the
    /// build's own reactor.
    pub fn run_sync(self) -> Result<(CapturedStreams, ExitOutcome), CommandError> {
        let mut reactor = glacier_reactor::PlatformReactor::new().map_err(|source| {
            CommandError::Spawn { program: self.program.as_str().to_owned(), source }
        })?;
        let outcome = Rc::new(RefCell::new(None));
        let outcome_slot = outcome.clone();
        let captured = self.spawn(&mut reactor, move |o| *outcome_slot.borrow_mut() = Some(o))?;
        reactor.run();
        let outcome = outcome.borrow_mut().take().expect("reactor drained without posting exit");
        Ok((captured, outcome))
    }
}

/// Splits a stream of arbitrary-sized chunks into `\r?\n`-terminated
/// lines, retaining a partial tail across calls. Used to build
/// [`StreamEndpoint::Tap`] callbacks for the compile-command subclasses,
/// which scan compiler output line by line for implicit dependencies.
///
/// An empty chunk — the [`ReadCallback`][glacier_reactor::ReadCallback]
/// convention for end of stream — flushes any remaining partial line as a
/// final one.
pub struct LineSplitter<F> {
    buffer: Vec<u8>,
    on_line: F,
}

impl<F: FnMut(&str)> LineSplitter<F> {
    /// Build a splitter that calls `on_line` once per complete line.
    pub fn new(on_line: F) -> Self {
        Self { buffer: Vec::new(), on_line }
    }

    /// Feed one chunk, as handed to a [`StreamEndpoint::Tap`] callback.
    pub fn feed(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            if !self.buffer.is_empty() {
                let line = String::from_utf8_lossy(&self.buffer).into_owned();
                (self.on_line)(&line);
                self.buffer.clear();
            }
            return;
        }
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut end = pos;
            if end > 0 && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
            (self.on_line)(&line);
            self.buffer.drain(..=pos);
        }
    }
}

fn push_quoted(out: &mut String, s: &str) {
    if s.contains(' ') {
        out.push('"');
        out.push_str(s);
        out.push('"');
    } else {
        out.push_str(s);
    }
}

#[cfg(unix)]
#[path = "raw/unix.rs"]
mod sys;

#[cfg(windows)]
#[path = "raw/windows.rs"]
mod sys;

/// Spawn with one or both of stdin/stdout overridden by an externally
/// supplied OS handle, bypassing that stream's own [`StreamEndpoint`].
/// Used only by [`crate::pipeline::spawn_pipeline`] to hand the two
/// halves of one pipe to a leader and a follower command.
pub(crate) use sys::spawn_with_overrides;
