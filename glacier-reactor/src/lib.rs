//! A single-threaded, cooperative, completion-port-style event loop.
//!
//! Exactly one [`Reactor`] exists per build. All callbacks run on the
//! thread that calls [`Reactor::run`]; the only suspension point is the
//! reactor's own wait primitive (epoll/kqueue/IOCP). This buys parallelism
//! through OS child processes without needing to lock the DAG or the file
//! registry, at the cost of commands never blocking that thread themselves
//! — see the crate-level design notes in `DESIGN.md`.

#![warn(missing_docs)]

#[cfg(target_os = "linux")]
pub use unix::epoll::EpollReactor as PlatformReactor;

#[cfg(target_os = "macos")]
pub use unix::kqueue::KqueueReactor as PlatformReactor;

#[cfg(windows)]
pub use windows::iocp::IocpReactor as PlatformReactor;

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

use std::io;

/// The readable end of a pipe (or similar stream) to drain asynchronously.
#[cfg(unix)]
pub type RawReadHandle = std::os::unix::io::OwnedFd;

/// The readable end of a pipe (or similar stream) to drain asynchronously.
#[cfg(windows)]
pub type RawReadHandle = std::os::windows::io::OwnedHandle;

/// A spawned child process to be notified about on exit.
pub struct ProcessHandle {
    /// The OS process id.
    pub pid: u32,
    /// The owning process handle, needed on Windows to assign the process
    /// into the per-build job object.
    #[cfg(windows)]
    pub handle: std::os::windows::io::OwnedHandle,
}

/// Called repeatedly as data becomes readable. An empty slice marks end of
/// stream — due to either a clean EOF or a read error, per spec: I/O
/// failures are treated as premature EOF and do not by themselves fail the
/// owning command. Called at most once more after the first empty call is
/// never guaranteed; callers must treat an empty slice as terminal.
pub type ReadCallback = Box<dyn FnMut(&[u8]) + 'static>;

/// Called exactly once when a registered process exits. The argument is
/// whether the process was killed for exceeding its time limit (Windows:
/// a per-process job's `PerProcessUserTimeLimit`; Unix: `SIGXCPU` from
/// `RLIMIT_CPU`).
pub type ProcessCallback = Box<dyn FnOnce(bool) + 'static>;

/// The single-threaded reactor interface implemented per OS.
pub trait Reactor {
    /// Begin draining `handle`, invoking `callback` for each chunk read
    /// and once more with an empty slice at end of stream.
    fn register_read(&mut self, handle: RawReadHandle, callback: ReadCallback) -> io::Result<()>;

    /// Be notified when `process` exits.
    fn register_process(&mut self, process: ProcessHandle, callback: ProcessCallback) -> io::Result<()>;

    /// Pump events until no reads or processes are outstanding, or until
    /// [`stop`][Self::stop] is called.
    fn run(&mut self);

    /// Idempotent: post a wakeup and mark the reactor to return from
    /// [`run`][Self::run] as soon as the current callback, if any, returns.
    fn stop(&mut self);
}
