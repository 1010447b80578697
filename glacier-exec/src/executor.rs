//! The scheduler: a ready queue gated by dependency counts and an
//! optional per-command concurrency limit, driving commands through the
//! reactor up to `maximum_running_commands` at a time.
//!
//! Grounded on `command_executor::run_next_raw`/`run_next`/`run`/`prepare`
//! in the original build tool's executor header. That implementation
//! re-enters its own scheduling loop directly from a command's completion
//! callback, which needs nothing more than a raw pointer back to the
//! executor. The reactor here hands completions to a `'static` closure
//! that cannot safely hold a borrow of the executor (or of the reactor
//! driving it), so this port restructures the loop into rounds: dispatch
//! every currently-runnable command, drive the reactor to drain exactly
//! that batch, then fold the results back into the DAG state before
//! computing the next batch. Concurrency is still capped at
//! `maximum_running_commands` and a finishing command still unblocks its
//! dependents immediately at the end of its round — only the "start a
//! replacement the instant a slot frees up, without waiting for its
//! siblings" granularity is traded away.

use {
    crate::{
        dag::Dag,
        report::ExecutionReport,
    },
    glacier_commands::{Command, CommandOutcome, SimultaneousJobs},
    glacier_core::{CommandStorage, OutdatednessReason},
    glacier_reactor::Reactor,
    std::{
        cell::RefCell,
        collections::{HashMap, VecDeque},
        rc::Rc,
        time::{Instant, SystemTime, UNIX_EPOCH},
    },
};

/// The executor's tunables (spec §4.9's `maximum_running_commands`,
/// `ignore_errors`, plus the rebuild-all/explain flags).
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// How many commands may run concurrently. Defaults to the host's
    /// available parallelism.
    pub maximum_running_commands: usize,
    /// How many command failures to tolerate before the executor stops
    /// dequeueing new work. In-flight commands still finish naturally.
    pub ignore_errors: usize,
    /// Force every command to be treated as outdated.
    pub rebuild_all: bool,
    /// Log each command's outdatedness reason as it is considered.
    pub explain_outdated: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            maximum_running_commands: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            ignore_errors: 0,
            rebuild_all: false,
            explain_outdated: false,
        }
    }
}

struct InFlight {
    hash: u64,
    inputs: Vec<glacier_util::Path>,
    outputs: Vec<glacier_util::Path>,
    gate: Option<SimultaneousJobs>,
}

/// Drives a [`Dag`] to completion against a [`CommandStorage`] and a
/// [`Reactor`].
pub struct Executor {
    commands: Vec<Option<Command>>,
    dependents: Vec<Vec<usize>>,
    pending_deps_count: Vec<usize>,
    ready: VecDeque<usize>,
    config: ExecutorConfig,
    running_commands: usize,
    in_flight: HashMap<usize, InFlight>,
    outcomes: Rc<RefCell<HashMap<usize, CommandOutcome>>>,
    errors: Vec<String>,
    executed: usize,
    skipped: usize,
    fatal: bool,
}

impl Executor {
    /// Build an executor for the given graph.
    pub fn new(dag: Dag, config: ExecutorConfig) -> Self {
        let ready = dag
            .pending_deps_count
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count == 0)
            .map(|(index, _)| index)
            .collect();
        Self {
            commands: dag.commands,
            dependents: dag.dependents,
            pending_deps_count: dag.pending_deps_count,
            ready,
            config,
            running_commands: 0,
            in_flight: HashMap::new(),
            outcomes: Rc::new(RefCell::new(HashMap::new())),
            errors: Vec::new(),
            executed: 0,
            skipped: 0,
            fatal: false,
        }
    }

    /// Run every command the graph can reach, in dependency order, until
    /// the ready queue is drained or [`is_stopped`][Self::is_stopped].
    pub fn run(mut self, reactor: &mut dyn Reactor, storage: &mut CommandStorage) -> ExecutionReport {
        let start = Instant::now();

        loop {
            if self.is_stopped() {
                break;
            }
            let batch = self.pop_ready_batch();
            if batch.is_empty() {
                if !self.ready.is_empty() {
                    self.errors.push(
                        "no progress possible: simultaneous_jobs exhausted with nothing in flight".to_owned(),
                    );
                }
                break;
            }

            for index in batch {
                self.dispatch(index, reactor, storage);
            }
            reactor.run();
            self.drain_outcomes(storage);
        }

        ExecutionReport {
            executed: self.executed,
            skipped: self.skipped,
            errors: self.errors,
            wall_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// `errors.len() > ignore_errors`, or a fatal (storage) failure
    /// occurred — matches spec §4.9's stop condition.
    fn is_stopped(&self) -> bool {
        self.fatal || self.errors.len() > self.config.ignore_errors
    }

    fn pop_ready_batch(&mut self) -> Vec<usize> {
        let room = self.config.maximum_running_commands.saturating_sub(self.running_commands);
        let mut batch = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(index) = self.ready.pop_front() {
            if batch.len() >= room {
                remaining.push_back(index);
                continue;
            }
            let gate = self.commands[index].as_ref().expect("ready command already taken").io().simultaneous_jobs.clone();
            let runnable = match &gate {
                Some(gate) => gate.get() > 0,
                None => true,
            };
            if runnable {
                if let Some(gate) = &gate {
                    gate.set(gate.get() - 1);
                }
                batch.push(index);
            } else {
                remaining.push_back(index);
            }
        }
        self.ready = remaining;
        batch
    }

    fn dispatch(&mut self, index: usize, reactor: &mut dyn Reactor, storage: &mut CommandStorage) {
        let command = self.commands[index].take().expect("command dispatched twice");

        let outdated = if self.config.rebuild_all {
            OutdatednessReason::NewCommand
        } else {
            command.outdated(storage)
        };
        if self.config.explain_outdated {
            tracing::info!(name = %command.name(), reason = ?outdated, "considering command");
        }

        if !outdated.is_outdated() {
            self.skipped += 1;
            self.release_dependents(index);
            return;
        }

        self.executed += 1;
        self.running_commands += 1;
        let gate = command.io().simultaneous_jobs.clone();
        let hash = command.hash();
        let inputs = command.io().inputs.clone();
        let outputs = command.io().outputs.clone();
        self.in_flight.insert(index, InFlight { hash, inputs, outputs, gate });

        let outcomes = self.outcomes.clone();
        let spawn_result = command.run(reactor, move |outcome| {
            outcomes.borrow_mut().insert(index, outcome);
        });
        if let Err(err) = spawn_result {
            // Spawn failed before `start`, per spec §4.9's failure modes.
            self.running_commands -= 1;
            self.in_flight.remove(&index);
            self.errors.push(err.to_string());
        }
    }

    fn drain_outcomes(&mut self, storage: &mut CommandStorage) {
        let outcomes: Vec<(usize, CommandOutcome)> = self.outcomes.borrow_mut().drain().collect();
        for (index, outcome) in outcomes {
            self.running_commands -= 1;
            let meta = self.in_flight.remove(&index).expect("outcome for unknown in-flight command");
            if let Some(gate) = &meta.gate {
                gate.set(gate.get() + 1);
            }
            match outcome.result {
                Ok(()) => {
                    let mut all_inputs = meta.inputs;
                    all_inputs.extend(outcome.implicit_inputs);
                    match storage.add(meta.hash, now_nanos(), all_inputs, meta.outputs) {
                        Ok(()) => self.release_dependents(index),
                        Err(err) => {
                            self.fatal = true;
                            self.errors.push(format!("command storage append failed: {err}"));
                        }
                    }
                }
                Err(err) => self.errors.push(err.to_string()),
            }
        }
    }

    fn release_dependents(&mut self, index: usize) {
        for dependent in self.dependents[index].clone() {
            self.pending_deps_count[dependent] -= 1;
            if self.pending_deps_count[dependent] == 0 {
                self.ready.push_back(dependent);
            }
        }
    }
}

fn now_nanos() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use glacier_commands::{IoCommand, RawCommand};
    use std::io::Write;

    fn touch(path: &std::path::Path) {
        std::fs::File::create(path).unwrap();
    }

    #[test]
    fn skips_fresh_commands() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.c");
        touch(&input);
        let mut storage = CommandStorage::open(dir.path()).unwrap();

        let command = IoCommand::new(RawCommand::new("true")).input(glacier_util::Path::from(input.as_path()));
        storage.add(command.hash(), u64::MAX, vec![glacier_util::Path::from(input.as_path())], vec![]).unwrap();

        let dag = Dag::build(vec![Command::Io(command)]).unwrap();
        let executor = Executor::new(dag, ExecutorConfig::default());
        let mut reactor = glacier_reactor::PlatformReactor::new().unwrap();
        let report = executor.run(&mut reactor, &mut storage);

        assert_eq!(report.executed, 0);
        assert_eq!(report.skipped, 1);
        assert!(report.ok());
    }

    #[test]
    fn rebuild_all_forces_execution() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = CommandStorage::open(dir.path()).unwrap();

        let program = if cfg!(windows) { "cmd" } else { "true" };
        let mut raw = RawCommand::new(program);
        if cfg!(windows) {
            raw = raw.arg("/c").arg("exit 0");
        }
        let command = IoCommand::new(raw);
        storage.add(command.hash(), u64::MAX, vec![], vec![]).unwrap();

        let dag = Dag::build(vec![Command::Io(command)]).unwrap();
        let mut config = ExecutorConfig::default();
        config.rebuild_all = true;
        let executor = Executor::new(dag, config);
        let mut reactor = glacier_reactor::PlatformReactor::new().unwrap();
        let report = executor.run(&mut reactor, &mut storage);

        assert_eq!(report.executed, 1);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn dependents_run_after_their_producer() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = CommandStorage::open(dir.path()).unwrap();
        let marker = dir.path().join("produced");

        let produce = IoCommand::new(
            RawCommand::new(if cfg!(windows) { "cmd" } else { "sh" })
                .arg(if cfg!(windows) { "/c" } else { "-c" })
                .arg(format!("echo hi > {}", marker.display())),
        )
        .output(glacier_util::Path::from(marker.as_path()));
        let consume = IoCommand::new(
            RawCommand::new(if cfg!(windows) { "cmd" } else { "true" })
                .args(if cfg!(windows) { vec!["/c".into(), "exit 0".into()] } else { vec![] }),
        )
        .input(glacier_util::Path::from(marker.as_path()));

        let dag = Dag::build(vec![Command::Io(produce), Command::Io(consume)]).unwrap();
        let executor = Executor::new(dag, ExecutorConfig::default());
        let mut reactor = glacier_reactor::PlatformReactor::new().unwrap();
        let report = executor.run(&mut reactor, &mut storage);

        assert_eq!(report.executed, 2);
        let _ = Write::flush(&mut std::io::sink());
    }
}
