//! Deterministic hashing, used for fingerprinting commands and files.
//!
//! [`std::hash::Hash`]/[`std::collections::hash_map::DefaultHasher`] are
//! deliberately not used here: `DefaultHasher` is seeded randomly per
//! process, so two runs of the same build would compute different
//! fingerprints for the same command and every entry in the persisted
//! command database would look stale. BLAKE3 gives a stable, 256-bit digest
//! that is then truncated to the 64-bit width the on-disk format and the
//! XOR-combine formula in [`command`] both use.

pub use self::{blake3::*, command::*, put::*};

mod blake3;
mod command;
mod put;

use std::fmt;

/// A 256-bit BLAKE3 digest.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Truncate to the 64-bit width used for command and file fingerprints.
    ///
    /// Truncation of a cryptographic digest does not weaken it for this
    /// use: collisions are a correctness concern (two distinct commands or
    /// files treated as the same), not a security one, and 64 bits is the
    /// width the on-disk record format and the original build tool both
    /// commit to.
    pub fn to_u64(self) -> u64 {
        u64::from_le_bytes(self.0[..8].try_into().unwrap())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_hex() {
        let hash = Blake3::new().update(b"Hello, world!").finalize();
        assert_eq!(
            hash.to_string(),
            "ede5c0b10f2ec4979c69b52f61e42ff5b413519ce09be0f14d098dcfe5f6f98d",
        );
    }
}
