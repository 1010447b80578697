//! POSIX system call wrappers (Linux, macOS).

pub use {
    self::{dirent_::*, fcntl::*, mmap::*, stdlib::*, sys_stat::*, unistd::*},
    libc::{
        AT_SYMLINK_NOFOLLOW,
        O_CREAT, O_DIRECTORY, O_NOFOLLOW, O_PATH, O_RDONLY, O_WRONLY,
        S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, S_IXUSR,
        gid_t, uid_t,
    },
};

pub mod cstr;
pub mod io;
pub mod mmap;
pub mod stdio;

mod dirent_;
mod fcntl;
mod stdlib;
mod sys_stat;
mod unistd;
