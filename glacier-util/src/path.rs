//! UTF-8 normalised paths.

use std::{fmt, path::PathBuf};

/// A path in the engine's internal, UTF-8, forward-slash-separated form.
///
/// Converted to an OS-native [`PathBuf`] only at the syscall boundary
/// ([`Path::to_os_path`]); everywhere else (hashing, the DAG, the file
/// registry) paths are compared and stored in this normalised form so the
/// same file is recognised regardless of how a collaborator spelled it.
#[derive(Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Path(String);

impl Path {
    /// Normalise an arbitrary OS path: backslashes become forward slashes,
    /// and a leading Windows drive letter is lower-cased.
    pub fn normalize(path: impl AsRef<std::path::Path>) -> Self {
        let raw = path.as_ref().to_string_lossy().replace('\\', "/");
        Self(lowercase_drive_letter(raw))
    }

    /// Borrow the normalised form as a plain string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to an OS-native path, for use right before a syscall.
    pub fn to_os_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

fn lowercase_drive_letter(s: String) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let mut s = s;
        s.replace_range(0..1, &s[0..1].to_ascii_lowercase());
        s
    } else {
        s
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&std::path::Path> for Path {
    fn from(path: &std::path::Path) -> Self {
        Self::normalize(path)
    }
}

impl From<PathBuf> for Path {
    fn from(path: PathBuf) -> Self {
        Self::normalize(path)
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Self::normalize(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators() {
        let p = Path::normalize("a\\b/c");
        assert_eq!(p.as_str(), "a/b/c");
    }

    #[test]
    fn lowercases_drive_letter() {
        let p = Path::normalize("C:/foo/bar");
        assert_eq!(p.as_str(), "c:/foo/bar");
    }

    #[test]
    fn leaves_non_drive_paths_alone() {
        let p = Path::normalize("/usr/include/stdio.h");
        assert_eq!(p.as_str(), "/usr/include/stdio.h");
    }
}
