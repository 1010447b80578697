//! Win32 system primitives (process spawning, overlapped I/O, mmap).

pub use self::{mmap::*, process::*};

pub mod mmap;
pub mod process;
