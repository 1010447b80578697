//! Command types: bare process invocation ([`raw`]), declared
//! inputs/outputs with a persisted hash ([`io_command`]), and the
//! compiler-specific subclasses that recover implicit header
//! dependencies from compiler output ([`compile`]).
//!
//! No inheritance chain is used — per spec §9's design note, concrete
//! variants ([`RawCommand`], [`IoCommand`], [`compile::MsvcCompileCommand`],
//! [`compile::GccCompileCommand`]) each wrap the previous layer and are
//! dispatched by the caller, not by a shared base class.

#![warn(missing_docs)]

pub mod command;
pub mod compile;
pub mod error;
pub mod io_command;
pub mod pipeline;
pub mod raw;

pub use crate::{
    command::{Command, CommandOutcome},
    compile::{CompileOutcome, GccCompileCommand, MsvcCompileCommand},
    error::CommandError,
    io_command::{IoCommand, IoCommandOutcome, SimultaneousJobs},
    raw::{CapturedStreams, ExitOutcome, LineSplitter, RawCommand, StreamEndpoint},
};
