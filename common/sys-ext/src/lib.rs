//! Extra items for talking to the operating system.
//!
//! This crate provides a safe, low-level interface to the operating system,
//! covering both the POSIX primitives the command engine needs on Linux and
//! macOS (`unix` module) and their nearest Win32 equivalents (`windows`
//! module). Unix functions are named after their underlying system calls
//! and their behavior is identical except for the differences listed below;
//! the exact semantics of each can be found in their man pages. This is in
//! contrast with the std crate, which gives no such guarantees — a
//! trade-off against portability we accept because the command engine needs
//! raw `stat`-family timestamps and `fd`-relative opens that std does not
//! expose.
//!
//! # Differences with underlying system calls (Unix)
//!
//! Errors are reported using [`Result`] rather than
//! through `errno` and an arbitrary return value.
//!
//! Regular string arguments are accepted instead of NUL-terminated strings.
//! They are automatically made NUL-terminated by the wrapper functions.
//! If an interior NUL is found within the string,
//! the wrapper function fails with `EINVAL`.
//!
//! When a new file descriptor is created by one of the functions,
//! it is created with the `FD_CLOEXEC` bit set (atomically).
//! That is, the `*_CLOEXEC` flag is set implicitly by the wrapper functions.
//! This ensures no resources are leaked in a threaded program that forks.
//!
//! If the system call fails with `EINTR` (interrupted),
//! the wrapper function automatically retries it.
//!
//! [`Result`]: `std::io::Result`

#![warn(missing_docs)]

#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
pub use windows::*;

#[cfg(unix)]
mod unix;

#[cfg(windows)]
mod windows;

use std::io::{self, ErrorKind::Interrupted};

// Cannot `pub use` as that would also export the stat function.
#[cfg(unix)]
#[allow(missing_docs, non_camel_case_types)]
pub type stat = libc::stat;

/// Call `f` until it no longer fails with `EINTR`.
///
/// A no-op loop body on Windows, which has no `EINTR` equivalent; kept
/// outside the `unix` module so both backends can share the same retry
/// helper name.
pub(crate) fn retry_on_eintr<F, T>(mut f: F) -> io::Result<T>
    where F: FnMut() -> io::Result<T>
{
    loop {
        match f() {
            Err(err) if err.kind() == Interrupted => continue,
            result                                => return result,
        }
    }
}
