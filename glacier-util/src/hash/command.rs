use {
    super::Blake3,
    crate::{argument::Argument, path::Path},
};

/// Builds the 64-bit command fingerprint:
///
/// ```text
/// h  = 0
/// for a in arguments:        h ^= hash(typeof(a), a)
/// h ^= hash(working_directory)
/// for (k,v) in environment:  h ^= hash(k) ^ hash(v)
/// if redirect-to-path set:   h ^= hash(path)
/// ```
///
/// XOR-combining independently hashed fields, rather than streaming every
/// field into one running hasher, is what makes the environment-pair order
/// not matter: `put_env("A", "1")` then `put_env("B", "2")` folds in the
/// same bits regardless of which call happens first.
#[derive(Default)]
pub struct CommandHashBuilder(u64);

impl CommandHashBuilder {
    /// Start a new, empty fingerprint.
    pub fn new() -> Self {
        Self(0)
    }

    /// Fold in one argument, tagged by its variant so that e.g. the literal
    /// string `"out.o"` and the path `out.o` never hash identically.
    pub fn put_argument(&mut self, value: &Argument) -> &mut Self {
        let hash = Blake3::new()
            .put_u8(value.type_tag())
            .put_str(value.as_str())
            .finalize();
        self.combine(hash.to_u64())
    }

    /// Fold in the working directory.
    pub fn put_cwd(&mut self, cwd: &Path) -> &mut Self {
        let hash = Blake3::new().put_str(cwd.as_str()).finalize();
        self.combine(hash.to_u64())
    }

    /// Fold in one environment variable assignment.
    pub fn put_env(&mut self, key: &str, value: &str) -> &mut Self {
        let hk = Blake3::new().put_str(key).finalize();
        let hv = Blake3::new().put_str(value).finalize();
        self.combine(hk.to_u64()).combine(hv.to_u64())
    }

    /// Fold in a `redirect-to-path` stream endpoint.
    pub fn put_redirect(&mut self, path: &Path) -> &mut Self {
        let hash = Blake3::new().put_str(path.as_str()).finalize();
        self.combine(hash.to_u64())
    }

    /// Extract the finished fingerprint.
    pub fn finish(&self) -> u64 {
        self.0
    }

    fn combine(&mut self, value: u64) -> &mut Self {
        self.0 ^= value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(s: &str) -> Argument {
        Argument::Owned(s.to_owned())
    }

    #[test]
    fn deterministic_across_clones() {
        let mut a = CommandHashBuilder::new();
        a.put_argument(&arg("cl.exe")).put_argument(&arg("/c"));
        a.put_cwd(&Path::from("c:/src"));

        let mut b = CommandHashBuilder::new();
        b.put_argument(&arg("cl.exe")).put_argument(&arg("/c"));
        b.put_cwd(&Path::from("c:/src"));

        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn env_order_does_not_matter() {
        let mut a = CommandHashBuilder::new();
        a.put_env("A", "1").put_env("B", "2");

        let mut b = CommandHashBuilder::new();
        b.put_env("B", "2").put_env("A", "1");

        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn changing_an_argument_changes_the_hash() {
        let mut a = CommandHashBuilder::new();
        a.put_argument(&arg("cl.exe"));

        let mut b = CommandHashBuilder::new();
        b.put_argument(&arg("clang.exe"));

        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn argument_type_tag_is_folded_into_the_hash() {
        let mut a = CommandHashBuilder::new();
        a.put_argument(&Argument::Owned("out.o".to_owned()));

        let mut b = CommandHashBuilder::new();
        b.put_argument(&Argument::Path(Path::from("out.o")));

        assert_ne!(a.finish(), b.finish());
    }
}
