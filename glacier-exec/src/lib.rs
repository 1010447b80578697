//! Dependency graph construction and the scheduler that runs it: matches
//! declared outputs against declared inputs into a DAG, rejects cycles,
//! then drives commands through a [`glacier_reactor::Reactor`] up to a
//! configurable concurrency limit, consulting and updating a
//! [`glacier_core::CommandStorage`] as it goes.

#![warn(missing_docs)]

pub mod dag;
pub mod executor;
pub mod report;

pub use crate::{
    dag::{Dag, DagError},
    executor::{Executor, ExecutorConfig},
    report::ExecutionReport,
};
