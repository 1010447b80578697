//! Command-line argument values.

use crate::path::Path;
use std::{ffi::OsString, fmt};

/// One element of a command's argument vector.
///
/// A tagged union rather than a plain `String` so that path-valued
/// arguments can be normalised and hashed consistently with declared
/// inputs/outputs, and so that string literals baked into a collaborator
/// (e.g. `"-c"`) need not be heap-allocated per invocation.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Argument {
    /// A heap-allocated string argument.
    Owned(String),
    /// A `'static` string argument, typically a compiler flag.
    Borrowed(&'static str),
    /// A path argument, normalised the same way as declared inputs/outputs.
    Path(Path),
}

impl Argument {
    /// Render the argument as text suitable for `execve`/`CreateProcessW`.
    pub fn as_os_string(&self) -> OsString {
        match self {
            Argument::Owned(s) => OsString::from(s),
            Argument::Borrowed(s) => OsString::from(*s),
            Argument::Path(p) => p.to_os_path().into_os_string(),
        }
    }

    /// The text of the argument, for display and hashing.
    pub fn as_str(&self) -> &str {
        match self {
            Argument::Owned(s) => s,
            Argument::Borrowed(s) => s,
            Argument::Path(p) => p.as_str(),
        }
    }

    /// A small tag distinguishing the argument's variant, folded into the
    /// command hash so `Owned("a")` and `Path("a")` never collide.
    pub fn type_tag(&self) -> u8 {
        match self {
            Argument::Owned(_) => 0,
            Argument::Borrowed(_) => 0,
            Argument::Path(_) => 1,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Argument {
    fn from(s: String) -> Self {
        Argument::Owned(s)
    }
}

impl From<&'static str> for Argument {
    fn from(s: &'static str) -> Self {
        Argument::Borrowed(s)
    }
}

impl From<Path> for Argument {
    fn from(p: Path) -> Self {
        Argument::Path(p)
    }
}
