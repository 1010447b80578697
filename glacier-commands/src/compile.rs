//! Compile-command subclasses that recover implicit header dependencies
//! from compiler output, on top of [`IoCommand`].
//!
//! Grounded on `cl_exe_command`/`gcc_command` in the original build
//! tool's command header: both append a compiler-specific dependency
//! flag before spawning, and harvest `implicit_inputs` from the process's
//! own output rather than from a second invocation.

use {
    crate::{
        error::CommandError,
        io_command::{IoCommand, IoCommandOutcome},
        raw::{CapturedStreams, ExitOutcome, LineSplitter, RawCommand, StreamEndpoint},
    },
    glacier_reactor::Reactor,
    glacier_util::{Argument, Path},
    std::{cell::RefCell, fs, rc::Rc},
};

/// What a compile command produced, in addition to the plain exit/capture
/// outcome every [`IoCommand`] reports.
pub struct CompileOutcome {
    /// How the underlying process exited.
    pub exit: ExitOutcome,
    /// Headers discovered to have been read during this compile.
    pub implicit_inputs: Vec<Path>,
    /// `Err` with the spec §7 failure message (including the compiler's
    /// own diagnostics) if the compile failed.
    pub result: Result<(), CommandError>,
}

/// An MSVC (`cl.exe`) compile: wires `/showIncludes` through a
/// [`StreamEndpoint::Tap`] rather than a captured buffer, per spec §9's
/// note against keeping two parallel stdout buffers.
pub struct MsvcCompileCommand {
    /// The underlying declared-inputs/outputs command.
    pub io: IoCommand,
}

impl MsvcCompileCommand {
    /// Wrap an [`IoCommand`] invoking `cl.exe` (or a compatible driver).
    pub fn new(io: IoCommand) -> Self {
        Self { io }
    }

    /// Spawn the compile, scanning stdout for `/showIncludes` lines as
    /// they arrive. `on_complete` receives the harvested
    /// [`CompileOutcome`] once the process exits.
    pub fn run(
        mut self,
        reactor: &mut dyn Reactor,
        on_complete: impl FnOnce(CompileOutcome) + 'static,
    ) -> Result<CapturedStreams, CommandError> {
        self.io.raw.arguments.push(Argument::Borrowed("/showIncludes"));
        let prefix = msvc_prefix(&self.io.raw.program, &self.io.raw.environment)?;
        self.io.raw.stderr = StreamEndpoint::Captured;

        let implicit_inputs = Rc::new(RefCell::new(Vec::<Path>::new()));
        let diagnostics = Rc::new(RefCell::new(String::new()));
        let implicit_inputs_tap = implicit_inputs.clone();
        let diagnostics_tap = diagnostics.clone();
        let mut line_no = 0usize;
        let mut splitter = LineSplitter::new(move |line: &str| {
            line_no += 1;
            if line_no == 1 {
                // The compiland filename echo, not a diagnostic.
                return;
            }
            match line.strip_prefix(prefix.as_str()) {
                Some(rest) => implicit_inputs_tap.borrow_mut().push(Path::from(rest.trim_start())),
                None => {
                    diagnostics_tap.borrow_mut().push_str(line);
                    diagnostics_tap.borrow_mut().push('\n');
                }
            }
        });
        self.io.raw.stdout = StreamEndpoint::Tap(Box::new(move |chunk| splitter.feed(chunk)));

        let implicit_inputs_for_complete = implicit_inputs.clone();
        self.io.run(reactor, move |outcome| {
            let IoCommandOutcome { exit, captured, result } = outcome;
            let result = result.map_err(|err| attach_diagnostics(err, &diagnostics.borrow(), &captured));
            on_complete(CompileOutcome {
                exit,
                implicit_inputs: implicit_inputs_for_complete.borrow().clone(),
                result,
            });
        })
    }
}

/// A GCC/Clang compile: `-MD -MF <depsfile>`, with the deps file parsed
/// as a Makefile dependency rule after a successful run.
pub struct GccCompileCommand {
    /// The underlying declared-inputs/outputs command.
    pub io: IoCommand,
    /// Where `-MF` writes the Makefile-style dependency rule.
    pub deps_file: Path,
}

impl GccCompileCommand {
    /// Wrap an [`IoCommand`] invoking `gcc`/`clang`; dependencies are
    /// written to `deps_file` and parsed back after the process exits.
    pub fn new(io: IoCommand, deps_file: impl Into<Path>) -> Self {
        Self { io, deps_file: deps_file.into() }
    }

    /// Spawn the compile, parsing `deps_file` on success.
    pub fn run(
        mut self,
        reactor: &mut dyn Reactor,
        on_complete: impl FnOnce(CompileOutcome) + 'static,
    ) -> Result<CapturedStreams, CommandError> {
        self.io.raw.arguments.push(Argument::Borrowed("-MD"));
        self.io.raw.arguments.push(Argument::Borrowed("-MF"));
        self.io.raw.arguments.push(Argument::Path(self.deps_file.clone()));
        self.io.raw.stdout = StreamEndpoint::Captured;
        self.io.raw.stderr = StreamEndpoint::Captured;

        let deps_file = self.deps_file.clone();
        self.io.run(reactor, move |outcome| {
            let IoCommandOutcome { exit, result, .. } = outcome;
            let (implicit_inputs, result) = match result {
                Ok(()) => match parse_deps_file(&deps_file) {
                    Ok(inputs) => (inputs, Ok(())),
                    Err(err) => (Vec::new(), Err(err)),
                },
                Err(err) => (Vec::new(), Err(err)),
            };
            on_complete(CompileOutcome { exit, implicit_inputs, result });
        })
    }
}

fn attach_diagnostics(err: CommandError, diagnostics: &str, captured: &CapturedStreams) -> CommandError {
    let stderr = String::from_utf8_lossy(&captured.stderr.borrow()).into_owned();
    let combined = format!("{diagnostics}{stderr}");
    match err {
        CommandError::ExitCode { name, code, .. } => CommandError::ExitCode { name, code, captured: combined },
        CommandError::Signal { name, signal, .. } => CommandError::Signal { name, signal, captured: combined },
        other => other,
    }
}

/// Parse a `-MD`-style Makefile dependency rule: everything after the
/// first `": "` is a whitespace-separated list of paths, with
/// backslash-escaped whitespace and line continuations stripped.
fn parse_deps_file(path: &Path) -> Result<Vec<Path>, CommandError> {
    let text = fs::read_to_string(path.to_os_path()).map_err(CommandError::Io)?;
    let Some(colon) = text.find(": ") else {
        return Err(CommandError::DependencyParse {
            name: path.as_str().to_owned(),
            message: "missing ': ' separator in dependency file".to_owned(),
        });
    };

    let mut rest = &text[colon + 2..];
    let mut inputs = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '\\');
        if rest.is_empty() {
            break;
        }
        let bytes = rest.as_bytes();
        let mut end = rest.len();
        for i in 0..bytes.len() {
            let escaped = i > 0 && bytes[i - 1] == b'\\';
            if bytes[i].is_ascii_whitespace() && !escaped {
                end = i;
                break;
            }
        }
        let token: String = rest[..end].chars().filter(|&c| c != '\\').collect();
        inputs.push(Path::from(token.as_str()));
        rest = &rest[end..];
    }
    Ok(inputs)
}

thread_local! {
    static MSVC_PREFIX: RefCell<Option<String>> = RefCell::new(None);
}

/// The localisation-dependent `"Note: including file:  "` prefix
/// `/showIncludes` emits, discovered once per process by compiling a
/// throwaway header through the same compiler (spec §4.4).
fn msvc_prefix(compiler: &Path, environment: &[(String, String)]) -> Result<String, CommandError> {
    if let Some(cached) = MSVC_PREFIX.with(|cell| cell.borrow().clone()) {
        return Ok(cached);
    }
    let prefix = probe_msvc_prefix(compiler, environment)?;
    MSVC_PREFIX.with(|cell| *cell.borrow_mut() = Some(prefix.clone()));
    Ok(prefix)
}

fn probe_msvc_prefix(compiler: &Path, environment: &[(String, String)]) -> Result<String, CommandError> {
    let base = std::env::temp_dir().join("sw_msvc_prefix");
    let header = base.with_extension("h");
    let source = base.with_extension("c");
    let object = base.with_extension("obj");

    fs::write(&header, b"").map_err(CommandError::Io)?;
    fs::write(&source, b"#include \"sw_msvc_prefix.h\"\nint dummy;\n").map_err(CommandError::Io)?;
    let _cleanup = scope_exit::ScopeExit::new(|| {
        let _ = fs::remove_file(&header);
        let _ = fs::remove_file(&source);
        let _ = fs::remove_file(&object);
    });

    let mut probe = RawCommand::new(compiler.clone())
        .arg("/nologo")
        .arg("/c")
        .arg(Path::from(source.as_path()))
        .arg("/showIncludes")
        .arg(format!("/Fo{}", object.display()));
    probe.environment = environment.to_vec();
    probe.stdout = StreamEndpoint::Captured;
    probe.stderr = StreamEndpoint::Captured;

    let (captured, _exit) = probe.run_sync()?;

    let stdout = captured.stdout.borrow();
    let stderr = captured.stderr.borrow();
    let text = if !stdout.is_empty() {
        String::from_utf8_lossy(&stdout).into_owned()
    } else {
        String::from_utf8_lossy(&stderr).into_owned()
    };

    let fail = || CommandError::DependencyParse {
        name: "msvc prefix probe".to_owned(),
        message: format!("cannot find msvc prefix: {text}"),
    };

    let first_newline = text.find('\n').ok_or_else(fail)?;
    let rest = text[first_newline + 1..].trim_start();
    let root = header
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .unwrap_or_default();
    let marker = rest.find(&root).ok_or_else(fail)?;
    Ok(rest[..marker].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deps_file_parses_tokens_after_colon() {
        let dir = tempfile::tempdir().unwrap();
        let deps_path = dir.path().join("a.d");
        fs::write(&deps_path, "a.o: a.c a.h \\\n  b.h\n").unwrap();

        let inputs = parse_deps_file(&Path::from(deps_path.as_path())).unwrap();
        let rendered: Vec<&str> = inputs.iter().map(|p| p.as_str()).collect();
        assert_eq!(rendered, vec!["a.c", "a.h", "b.h"]);
    }

    #[test]
    fn deps_file_without_colon_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let deps_path = dir.path().join("bad.d");
        fs::write(&deps_path, "not a deps file").unwrap();

        assert!(parse_deps_file(&Path::from(deps_path.as_path())).is_err());
    }
}
