//! Windows spawn path: `CreateProcessW` with overlapped pipes registered
//! against the reactor's I/O completion port.
//!
//! Grounded on `sys_ext::windows::{create_process, create_overlapped_pipe}`
//! (themselves adapted from the original build tool's Win32 backend) and
//! on the handle-lifetime discipline in `raw/unix.rs`: every OS handle the
//! parent creates for the child is either handed off (closed once inherited)
//! or kept registered with the reactor, never leaked on an error path.

use {
    super::{CapturedStreams, ExitOutcome, RawCommand, StreamEndpoint},
    crate::error::CommandError,
    glacier_reactor::{ProcessHandle, Reactor},
    std::{
        cell::RefCell,
        ffi::{OsStr, OsString},
        io,
        os::windows::io::{AsRawHandle, OwnedHandle},
        rc::Rc,
    },
    sys_ext::windows as win,
};

enum Resolved {
    Inherited,
    ChildOnly(OwnedHandle),
    WithParentRead(OwnedHandle, OwnedHandle, Option<Box<dyn FnMut(&[u8])>>),
}

enum Capture {
    Buffer(Rc<RefCell<Vec<u8>>>),
    Tap(Box<dyn FnMut(&[u8])>),
}

pub(crate) fn spawn(
    cmd: RawCommand,
    reactor: &mut dyn Reactor,
    on_exit: impl FnOnce(ExitOutcome) + 'static,
) -> Result<CapturedStreams, CommandError> {
    spawn_with_overrides(cmd, reactor, on_exit, None, None)
}

pub(crate) fn spawn_with_overrides(
    cmd: RawCommand,
    reactor: &mut dyn Reactor,
    on_exit: impl FnOnce(ExitOutcome) + 'static,
    stdin_override: Option<OwnedHandle>,
    stdout_override: Option<OwnedHandle>,
) -> Result<CapturedStreams, CommandError> {
    let name = cmd.display_name();
    let spawn_err = |source: io::Error| CommandError::Spawn { program: name.clone(), source };

    let program: OsString = cmd.program.to_os_path().into_os_string();
    let mut command_line = OsString::from(quote(&program));
    for argument in &cmd.arguments {
        command_line.push(" ");
        command_line.push(quote(argument.as_os_string().as_os_str()));
    }

    let cwd: OsString = cmd.cwd.to_os_path().into_os_string();
    let environment: Vec<OsString> = cmd
        .environment
        .iter()
        .map(|(k, v)| OsString::from(format!("{k}={v}")))
        .collect();

    let stdin = resolve_input(cmd.stdin, stdin_override).map_err(spawn_err)?;
    let stdout = resolve_output(cmd.stdout, stdout_override).map_err(spawn_err)?;
    let stderr = resolve_output(cmd.stderr, None).map_err(spawn_err)?;

    if cmd.exec_replace
        && (matches!(stdout, Resolved::WithParentRead(..)) || matches!(stderr, Resolved::WithParentRead(..)))
    {
        return Err(spawn_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "exec_replace cannot capture stdout/stderr",
        )));
    }

    let stdin_handle = raw_child_handle(&stdin);
    let stdout_handle = raw_child_handle(&stdout);
    let stderr_handle = raw_child_handle(&stderr);

    let child = win::create_process(
        &program,
        &command_line,
        Some(&cwd),
        &environment,
        stdin_handle,
        stdout_handle,
        stderr_handle,
    )
    .map_err(spawn_err)?;

    if cmd.exec_replace {
        // Windows has no in-place exec: the new process is already running,
        // so the caller's job is done. Exit immediately rather than
        // returning, so nothing downstream observes this process as the
        // "original" one still being alive.
        std::process::exit(0);
    }

    drop_child_only(stdin);
    let stdout_capture = drop_child_only_keep_read(stdout);
    let stderr_capture = drop_child_only_keep_read(stderr);

    let mut captured = CapturedStreams::default();
    if let Some((handle, capture)) = stdout_capture {
        if let Capture::Buffer(buffer) = &capture {
            captured.stdout = buffer.clone();
        }
        register_capture(reactor, handle, capture).map_err(spawn_err)?;
    }
    if let Some((handle, capture)) = stderr_capture {
        if let Capture::Buffer(buffer) = &capture {
            captured.stderr = buffer.clone();
        }
        register_capture(reactor, handle, capture).map_err(spawn_err)?;
    }

    if let Some(limit) = cmd.time_limit {
        // Per-command CPU-time limiting needs its own job (nested jobs,
        // supported since Windows 8) distinct from the reactor's
        // kill-on-build-exit job; approximated here with the same
        // extended-limit mechanism described in spec §4.3 step 4.
        let _ = win::set_per_process_time_limit(&child.process, limit);
    }

    if cmd.detach {
        // Fire-and-forget: report success now instead of waiting for the
        // reactor to observe an exit that may never come while we're alive.
        drop(child.thread);
        drop(child.process);
        on_exit(ExitOutcome { exit_code: Some(0), signal: None, timed_out: false });
        return Ok(captured);
    }

    let exit_query = win::duplicate_handle(&child.process).map_err(spawn_err)?;
    reactor
        .register_process(
            ProcessHandle { pid: child.pid, handle: child.process },
            Box::new(move |timed_out| {
                let outcome = ExitOutcome {
                    exit_code: win::exit_code_of(&exit_query).ok(),
                    signal: None,
                    timed_out,
                };
                on_exit(outcome);
            }),
        )
        .map_err(spawn_err)?;
    drop(child.thread);

    Ok(captured)
}

fn quote(s: &OsStr) -> OsString {
    let text = s.to_string_lossy();
    if text.contains(' ') {
        let mut quoted = OsString::from("\"");
        quoted.push(&*text);
        quoted.push("\"");
        quoted
    } else {
        OsString::from(s)
    }
}

fn raw_child_handle(resolved: &Resolved) -> std::os::windows::io::RawHandle {
    use std::ptr::null_mut;
    match resolved {
        Resolved::Inherited => null_mut(),
        Resolved::ChildOnly(h) => h.as_raw_handle(),
        Resolved::WithParentRead(child, _, _) => child.as_raw_handle(),
    }
}

fn register_capture(reactor: &mut dyn Reactor, handle: OwnedHandle, capture: Capture) -> io::Result<()> {
    match capture {
        Capture::Buffer(buffer) => reactor.register_read(handle, Box::new(move |chunk| {
            if !chunk.is_empty() {
                buffer.borrow_mut().extend_from_slice(chunk);
            }
        })),
        Capture::Tap(mut tap) => reactor.register_read(handle, Box::new(move |chunk| tap(chunk))),
    }
}

fn resolve_input(endpoint: StreamEndpoint, overridden: Option<OwnedHandle>) -> io::Result<Resolved> {
    if let Some(h) = overridden {
        return Ok(Resolved::ChildOnly(h));
    }
    match endpoint {
        StreamEndpoint::Inherit => Ok(Resolved::Inherited),
        StreamEndpoint::Null => Ok(Resolved::ChildOnly(win::open_nul_read()?)),
        StreamEndpoint::File(path) => Ok(Resolved::ChildOnly(win::open_read(&path.to_os_path())?)),
        StreamEndpoint::Captured | StreamEndpoint::Tap(_) => {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "stdin cannot be captured"))
        }
        StreamEndpoint::PipePeer => {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "PipePeer stdin requires spawn_pipeline"))
        }
    }
}

fn resolve_output(endpoint: StreamEndpoint, overridden: Option<OwnedHandle>) -> io::Result<Resolved> {
    if let Some(h) = overridden {
        return Ok(Resolved::ChildOnly(h));
    }
    match endpoint {
        StreamEndpoint::Inherit => Ok(Resolved::Inherited),
        StreamEndpoint::Null => Ok(Resolved::ChildOnly(win::open_nul_write()?)),
        StreamEndpoint::File(path) => Ok(Resolved::ChildOnly(win::create_write(&path.to_os_path())?)),
        StreamEndpoint::Captured => {
            let pipe = win::create_overlapped_pipe()?;
            Ok(Resolved::WithParentRead(pipe.write, pipe.read, None))
        }
        StreamEndpoint::Tap(callback) => {
            let pipe = win::create_overlapped_pipe()?;
            Ok(Resolved::WithParentRead(pipe.write, pipe.read, Some(callback)))
        }
        StreamEndpoint::PipePeer => {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "PipePeer stdout requires spawn_pipeline"))
        }
    }
}

fn drop_child_only(resolved: Resolved) {
    match resolved {
        Resolved::Inherited => {}
        Resolved::ChildOnly(h) => drop(h),
        Resolved::WithParentRead(write, read, _) => { drop(write); drop(read); }
    }
}

fn drop_child_only_keep_read(resolved: Resolved) -> Option<(OwnedHandle, Capture)> {
    match resolved {
        Resolved::Inherited | Resolved::ChildOnly(_) => {
            if let Resolved::ChildOnly(h) = resolved { drop(h); }
            None
        }
        Resolved::WithParentRead(write, read, tap) => {
            drop(write);
            let capture = match tap {
                Some(callback) => Capture::Tap(callback),
                None => Capture::Buffer(Rc::new(RefCell::new(Vec::new()))),
            };
            Some((read, capture))
        }
    }
}
