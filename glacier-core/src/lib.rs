//! The persisted command/file database and the outdatedness decision.
//!
//! This crate has no notion of processes or a DAG — it only knows how to
//! fingerprint-match a command against its last recorded run. The
//! `glacier-exec` crate builds the dependency graph and drives the
//! scheduler on top of it.

#![warn(missing_docs)]

pub mod command_storage;
pub mod file_registry;
pub mod outdated;
pub mod record;
pub mod stream;

pub use crate::{
    command_storage::CommandStorage,
    file_registry::FileRegistry,
    outdated::OutdatednessReason,
};
