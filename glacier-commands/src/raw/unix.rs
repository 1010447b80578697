//! Unix spawn path: `fork` + `execve`, with pipes wired into the reactor.
//!
//! Grounded on the fork/exec/pipe idiom in
//! `zopsicle-snowflake/snowflake-actions/src/run_command.rs::run_command`,
//! stripped of that function's mount-namespace sandboxing (out of scope
//! here) but keeping its pre-exec-error-over-a-pipe trick and its
//! `ScopeExit`-guarded child-kill-on-setup-failure pattern.

use {
    super::{CapturedStreams, ExitOutcome, RawCommand, StreamEndpoint},
    crate::error::CommandError,
    glacier_reactor::{ProcessHandle, Reactor},
    scope_exit::ScopeExit,
    std::{
        cell::RefCell,
        ffi::CString,
        io::{self, Read},
        mem::forget,
        os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
        ptr::null_mut,
        rc::Rc,
    },
    sys_ext::cstr::IntoCStr,
};

/// One resolved standard stream: the fd to `dup2` into the child, and the
/// parent-side half (if any) to keep registered with the reactor.
enum Resolved {
    Inherited,
    ChildOnly(OwnedFd),
    WithParentRead(OwnedFd, OwnedFd, Option<Box<dyn FnMut(&[u8])>>),
}

/// What the parent does with a captured stream once the child exits.
enum Capture {
    /// Accumulate every chunk into a shared buffer (`StreamEndpoint::Captured`).
    Buffer(Rc<RefCell<Vec<u8>>>),
    /// Forward each chunk to a caller-supplied callback and retain nothing
    /// else, per [`StreamEndpoint::Tap`]'s contract.
    Tap(Box<dyn FnMut(&[u8])>),
}

pub(crate) fn spawn(
    cmd: RawCommand,
    reactor: &mut dyn Reactor,
    on_exit: impl FnOnce(ExitOutcome) + 'static,
) -> Result<CapturedStreams, CommandError> {
    spawn_with_overrides(cmd, reactor, on_exit, None, None)
}

/// Like [`spawn`], but `stdin_override`/`stdout_override` (when given)
/// replace the command's own [`StreamEndpoint`] resolution for that
/// stream — used by [`crate::pipeline::spawn_pipeline`] to hand a shared
/// OS pipe end to each side of a two-command chain.
pub(crate) fn spawn_with_overrides(
    cmd: RawCommand,
    reactor: &mut dyn Reactor,
    on_exit: impl FnOnce(ExitOutcome) + 'static,
    stdin_override: Option<OwnedFd>,
    stdout_override: Option<OwnedFd>,
) -> Result<CapturedStreams, CommandError> {
    let name = cmd.display_name();
    let spawn_err = |source: io::Error| CommandError::Spawn { program: name.clone(), source };

    let program = cmd.program.as_str().into_cstr().map_err(|_| {
        spawn_err(io::Error::new(io::ErrorKind::InvalidInput, "nul byte in program path"))
    })?;

    let mut argv: Vec<CString> = vec![program.as_ref().to_owned()];
    for argument in &cmd.arguments {
        argv.push(CString::new(argument.as_str()).map_err(|_| {
            spawn_err(io::Error::new(io::ErrorKind::InvalidInput, "nul byte in argument"))
        })?);
    }
    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(null_mut());

    let mut envp: Vec<CString> = Vec::with_capacity(cmd.environment.len());
    for (key, value) in &cmd.environment {
        envp.push(
            CString::new(format!("{key}={value}"))
                .map_err(|_| spawn_err(io::Error::new(io::ErrorKind::InvalidInput, "nul byte in environment")))?,
        );
    }
    let mut envp_ptrs: Vec<*const libc::c_char> = envp.iter().map(|e| e.as_ptr()).collect();
    envp_ptrs.push(null_mut());

    let cwd = cmd.cwd.as_str().into_cstr().map_err(|_| {
        spawn_err(io::Error::new(io::ErrorKind::InvalidInput, "nul byte in working directory"))
    })?;

    let stdin = resolve_input(cmd.stdin, stdin_override).map_err(spawn_err)?;
    let stdout = resolve_output(cmd.stdout, stdout_override).map_err(spawn_err)?;
    let stderr = resolve_output(cmd.stderr, None).map_err(spawn_err)?;

    if cmd.exec_replace {
        // No fork: the calling process's image is replaced in place, so
        // there is no parent left afterward to read a captured stream.
        if matches!(stdout, Resolved::WithParentRead(..)) || matches!(stderr, Resolved::WithParentRead(..)) {
            return Err(spawn_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "exec_replace cannot capture stdout/stderr",
            )));
        }
        if let Resolved::ChildOnly(fd) | Resolved::WithParentRead(fd, _, _) = &stdin {
            if unsafe { libc::dup2(fd.as_raw_fd(), 0) } == -1 { return Err(spawn_err(io::Error::last_os_error())); }
        }
        if let Resolved::ChildOnly(fd) = &stdout {
            if unsafe { libc::dup2(fd.as_raw_fd(), 1) } == -1 { return Err(spawn_err(io::Error::last_os_error())); }
        }
        if let Resolved::ChildOnly(fd) = &stderr {
            if unsafe { libc::dup2(fd.as_raw_fd(), 2) } == -1 { return Err(spawn_err(io::Error::last_os_error())); }
        }
        if unsafe { libc::chdir(cwd.as_ptr()) } == -1 {
            return Err(spawn_err(io::Error::last_os_error()));
        }
        if let Some(limit) = cmd.time_limit {
            let secs = limit.as_secs() as libc::rlim_t;
            let rlimit = libc::rlimit { rlim_cur: secs, rlim_max: secs };
            unsafe { libc::setrlimit(libc::RLIMIT_CPU, &rlimit) };
        }
        unsafe { libc::execve(argv[0].as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr()) };
        // execve only returns on failure.
        return Err(spawn_err(io::Error::last_os_error()));
    }

    // Report pre-execve errors to the parent over a CLOEXEC pipe: on a
    // clean execve, the write end closes for free and the parent sees EOF.
    let mut err_fds = [0; 2];
    if unsafe { libc::pipe2(err_fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(spawn_err(io::Error::last_os_error()));
    }
    let (err_r, err_w) = (err_fds[0], err_fds[1]);

    let pid = unsafe { libc::fork() };
    if pid == -1 {
        unsafe { libc::close(err_r); libc::close(err_w); }
        return Err(spawn_err(io::Error::last_os_error()));
    }

    if pid == 0 {
        unsafe { libc::close(err_r) };
        let fail = |message: &str| unsafe {
            let errnum = *libc::__errno_location();
            let mut buf = errnum.to_ne_bytes().to_vec();
            buf.extend_from_slice(message.as_bytes());
            libc::write(err_w, buf.as_ptr().cast(), buf.len());
            libc::_exit(127);
        };

        if let Resolved::ChildOnly(fd) | Resolved::WithParentRead(fd, _, _) = &stdin {
            if unsafe { libc::dup2(fd.as_raw_fd(), 0) } == -1 { fail("dup2 stdin"); }
        }
        if let Resolved::ChildOnly(fd) | Resolved::WithParentRead(fd, _, _) = &stdout {
            if unsafe { libc::dup2(fd.as_raw_fd(), 1) } == -1 { fail("dup2 stdout"); }
        }
        if let Resolved::ChildOnly(fd) | Resolved::WithParentRead(fd, _, _) = &stderr {
            if unsafe { libc::dup2(fd.as_raw_fd(), 2) } == -1 { fail("dup2 stderr"); }
        }

        if unsafe { libc::chdir(cwd.as_ptr()) } == -1 { fail("chdir"); }

        if let Some(limit) = cmd.time_limit {
            let secs = limit.as_secs() as libc::rlim_t;
            let rlimit = libc::rlimit { rlim_cur: secs, rlim_max: secs };
            unsafe { libc::setrlimit(libc::RLIMIT_CPU, &rlimit) };
        }

        unsafe {
            libc::execve(argv[0].as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
        }
        fail("execve");
        unreachable!();
    }

    unsafe { libc::close(err_w) };
    // Drop the child-only halves now that they've been inherited across fork.
    drop_child_only(stdin);
    let stdout_capture = drop_child_only_keep_read(stdout);
    let stderr_capture = drop_child_only_keep_read(stderr);

    let kill_guard = ScopeExit::new(|| unsafe {
        libc::kill(pid, libc::SIGKILL);
        libc::waitpid(pid, null_mut(), libc::WNOHANG);
    });

    let mut err_buf = Vec::new();
    // SAFETY: err_r is a freshly created, owned-by-this-scope fd.
    let mut err_file = unsafe { std::fs::File::from_raw_fd(err_r) };
    err_file.read_to_end(&mut err_buf).map_err(spawn_err)?;
    if !err_buf.is_empty() && err_buf.len() >= 4 {
        let errnum = i32::from_ne_bytes(err_buf[..4].try_into().unwrap());
        let message = String::from_utf8_lossy(&err_buf[4..]).into_owned();
        forget(kill_guard);
        return Err(spawn_err(io::Error::from_raw_os_error(errnum)).context_message(message));
    }
    forget(kill_guard);

    let mut captured = CapturedStreams::default();
    if let Some((fd, capture)) = stdout_capture {
        if let Capture::Buffer(buffer) = &capture {
            captured.stdout = buffer.clone();
        }
        register_capture(reactor, fd, capture).map_err(spawn_err)?;
    }
    if let Some((fd, capture)) = stderr_capture {
        if let Capture::Buffer(buffer) = &capture {
            captured.stderr = buffer.clone();
        }
        register_capture(reactor, fd, capture).map_err(spawn_err)?;
    }

    if cmd.detach {
        // Fire-and-forget: report success now rather than waiting on a
        // reactor callback that may never come if the process outlives us.
        on_exit(ExitOutcome { exit_code: Some(0), signal: None, timed_out: false });
        return Ok(captured);
    }

    reactor
        .register_process(ProcessHandle { pid: pid as u32 }, Box::new(move |timed_out| {
            let mut wstatus = 0;
            unsafe { libc::waitpid(pid, &mut wstatus, 0) };
            let outcome = if unsafe { libc::WIFSIGNALED(wstatus) } {
                ExitOutcome { exit_code: None, signal: Some(unsafe { libc::WTERMSIG(wstatus) }), timed_out }
            } else {
                ExitOutcome { exit_code: Some(unsafe { libc::WEXITSTATUS(wstatus) }), signal: None, timed_out }
            };
            on_exit(outcome);
        }))
        .map_err(spawn_err)?;

    Ok(captured)
}

fn register_capture(reactor: &mut dyn Reactor, fd: OwnedFd, capture: Capture) -> io::Result<()> {
    match capture {
        Capture::Buffer(buffer) => reactor.register_read(fd, Box::new(move |chunk| {
            if !chunk.is_empty() {
                buffer.borrow_mut().extend_from_slice(chunk);
            }
        })),
        Capture::Tap(mut tap) => reactor.register_read(fd, Box::new(move |chunk| tap(chunk))),
    }
}

fn resolve_input(endpoint: StreamEndpoint, overridden: Option<OwnedFd>) -> io::Result<Resolved> {
    if let Some(fd) = overridden {
        return Ok(Resolved::ChildOnly(fd));
    }
    match endpoint {
        StreamEndpoint::Inherit => Ok(Resolved::Inherited),
        StreamEndpoint::Null => {
            let fd = sys_ext::open(cstr_dev_null(), libc::O_RDONLY, 0)?;
            Ok(Resolved::ChildOnly(fd))
        }
        StreamEndpoint::File(path) => {
            let path = path.as_str().into_cstr().map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte in path"))?;
            let fd = sys_ext::open(&path, libc::O_RDONLY, 0)?;
            Ok(Resolved::ChildOnly(fd))
        }
        StreamEndpoint::Captured | StreamEndpoint::Tap(_) => {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "stdin cannot be captured"))
        }
        StreamEndpoint::PipePeer => {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "PipePeer stdin requires spawn_pipeline"))
        }
    }
}

fn resolve_output(endpoint: StreamEndpoint, overridden: Option<OwnedFd>) -> io::Result<Resolved> {
    if let Some(fd) = overridden {
        return Ok(Resolved::ChildOnly(fd));
    }
    match endpoint {
        StreamEndpoint::Inherit => Ok(Resolved::Inherited),
        StreamEndpoint::Null => {
            let fd = sys_ext::open(cstr_dev_null(), libc::O_WRONLY, 0)?;
            Ok(Resolved::ChildOnly(fd))
        }
        StreamEndpoint::File(path) => {
            let path = path.as_str().into_cstr().map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte in path"))?;
            let fd = sys_ext::open(&path, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o644)?;
            Ok(Resolved::ChildOnly(fd))
        }
        StreamEndpoint::Captured => {
            let (write, read) = output_pipe()?;
            Ok(Resolved::WithParentRead(write, read, None))
        }
        StreamEndpoint::Tap(callback) => {
            let (write, read) = output_pipe()?;
            Ok(Resolved::WithParentRead(write, read, Some(callback)))
        }
        StreamEndpoint::PipePeer => {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "PipePeer stdout requires spawn_pipeline"))
        }
    }
}

fn output_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    let (read, write) = (fds[0], fds[1]);
    // SAFETY: just created by pipe2 above.
    let read = unsafe { OwnedFd::from_raw_fd(read) };
    let write = unsafe { OwnedFd::from_raw_fd(write) };
    Ok((write, read))
}

fn drop_child_only(resolved: Resolved) {
    // Both halves are simply dropped in the parent; the child already has
    // its own copy from before execve closed CLOEXEC descriptors.
    match resolved {
        Resolved::Inherited => {}
        Resolved::ChildOnly(fd) => drop(fd),
        Resolved::WithParentRead(write, read, _) => { drop(write); drop(read); }
    }
}

fn drop_child_only_keep_read(resolved: Resolved) -> Option<(OwnedFd, Capture)> {
    match resolved {
        Resolved::Inherited | Resolved::ChildOnly(_) => {
            if let Resolved::ChildOnly(fd) = resolved { drop(fd); }
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

fn cstr_dev_null() -> &'static std::ffi::CStr {
    sys_ext::cstr!("/dev/null")
}

trait ContextMessage {
    fn context_message(self, message: String) -> Self;
}

impl ContextMessage for CommandError {
    fn context_message(self, message: String) -> Self {
        match self {
            CommandError::Spawn { program, source } => {
                CommandError::Spawn { program, source: io::Error::new(source.kind(), format!("{source}: {message}")) }
            }
            other => other,
        }
    }
}
