//! Small, dependency-light building blocks shared by the command engine:
//! a normalised path representation, the tagged-union command argument
//! type, and the deterministic hashing primitives used to fingerprint
//! commands and files.

#![warn(missing_docs)]

pub mod argument;
pub mod hash;
pub mod path;

pub use crate::{argument::Argument, path::Path};
