//! Dependency graph construction: output/input matching and the cycle
//! check run before any command is allowed to execute.
//!
//! Grounded on `command_executor::make_dependencies`/`check_dag`/
//! `check_dag1` in the original build tool's executor header: one pass
//! maps every declared output to its producer (a duplicate producer is a
//! fatal configuration error), a second pass walks each command's
//! declared inputs and records an edge for every match, then a
//! three-colour DFS rejects cycles.

use {
    glacier_commands::Command,
    glacier_util::Path,
    std::collections::{HashMap, HashSet},
};

/// A fatal error discovered while building the graph, thrown before any
/// command runs.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// Two commands declared the same output path.
    #[error("more than one command produces: {path}")]
    DuplicateOutput {
        /// The output path produced by more than one command.
        path: Path,
    },
    /// The dependency edges contain a cycle.
    #[error("circular dependency detected")]
    Cycle,
}

/// The command dependency graph: every command, plus the edges derived
/// from matching declared outputs against declared inputs.
#[derive(Debug)]
pub struct Dag {
    pub(crate) commands: Vec<Option<Command>>,
    pub(crate) dependents: Vec<Vec<usize>>,
    pub(crate) pending_deps_count: Vec<usize>,
}

impl Dag {
    /// Build the graph from a flat command list.
    pub fn build(commands: Vec<Command>) -> Result<Self, DagError> {
        let mut producer_of: HashMap<Path, usize> = HashMap::new();
        for (index, command) in commands.iter().enumerate() {
            for output in &command.io().outputs {
                if producer_of.insert(output.clone(), index).is_some() {
                    return Err(DagError::DuplicateOutput { path: output.clone() });
                }
            }
        }

        let n = commands.len();
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (index, command) in commands.iter().enumerate() {
            let mut seen = HashSet::new();
            for input in &command.io().inputs {
                if let Some(&producer) = producer_of.get(input) {
                    if producer != index && seen.insert(producer) {
                        dependencies[index].push(producer);
                        dependents[producer].push(index);
                    }
                }
            }
        }

        check_dag(&dependencies)?;

        let pending_deps_count = dependencies.iter().map(Vec::len).collect();
        let commands = commands.into_iter().map(Some).collect();
        Ok(Self { commands, dependents, pending_deps_count })
    }

    /// How many commands the graph holds.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the graph has no commands at all.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Status {
    NotVisited,
    Visited,
    NoCircle,
}

fn check_dag(dependencies: &[Vec<usize>]) -> Result<(), DagError> {
    let mut status = vec![Status::NotVisited; dependencies.len()];
    for start in 0..dependencies.len() {
        check_dag1(start, dependencies, &mut status)?;
    }
    Ok(())
}

fn check_dag1(index: usize, dependencies: &[Vec<usize>], status: &mut [Status]) -> Result<(), DagError> {
    match status[index] {
        Status::NoCircle => return Ok(()),
        Status::Visited => return Err(DagError::Cycle),
        Status::NotVisited => {}
    }
    status[index] = Status::Visited;
    for &dependency in &dependencies[index] {
        check_dag1(dependency, dependencies, status)?;
    }
    status[index] = Status::NoCircle;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glacier_commands::{IoCommand, RawCommand};

    fn cmd(inputs: &[&str], outputs: &[&str]) -> Command {
        let mut c = IoCommand::new(RawCommand::new("cc"));
        for i in inputs {
            c = c.input(*i);
        }
        for o in outputs {
            c = c.output(*o);
        }
        Command::Io(c)
    }

    #[test]
    fn links_producer_to_consumer() {
        let dag = Dag::build(vec![cmd(&[], &["a.o"]), cmd(&["a.o"], &["a.exe"])]).unwrap();
        assert_eq!(dag.pending_deps_count, vec![0, 1]);
        assert_eq!(dag.dependents[0], vec![1]);
    }

    #[test]
    fn duplicate_output_is_fatal() {
        let err = Dag::build(vec![cmd(&[], &["a.o"]), cmd(&[], &["a.o"])]).unwrap_err();
        assert!(matches!(err, DagError::DuplicateOutput { .. }));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = Dag::build(vec![cmd(&["b.o"], &["a.o"]), cmd(&["a.o"], &["b.o"])]).unwrap_err();
        assert!(matches!(err, DagError::Cycle));
    }

    #[test]
    fn independent_commands_are_all_ready() {
        let dag = Dag::build(vec![cmd(&[], &["a.o"]), cmd(&[], &["b.o"])]).unwrap();
        assert_eq!(dag.pending_deps_count, vec![0, 0]);
    }
}
