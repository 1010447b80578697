//! Unix reactor backends.

#[cfg(target_os = "linux")]
pub mod epoll;

#[cfg(target_os = "macos")]
pub mod kqueue;

use std::io;

/// `pidfd_open(2)` isn't wrapped by `libc` on every supported version;
/// call it directly via `syscall(2)`. Only meaningful on Linux.
#[cfg(target_os = "linux")]
pub(crate) fn pidfd_open(pid: u32) -> io::Result<std::os::unix::io::OwnedFd> {
    use std::os::unix::io::FromRawFd;

    // SAFETY: SYS_pidfd_open with a valid pid and flags=0 is always sound
    // to call; it either returns a fresh owned fd or -1/errno.
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a newly created, owned file descriptor.
    Ok(unsafe { std::os::unix::io::OwnedFd::from_raw_fd(fd as i32) })
}
