//! Command-line driver: builds a small example command graph and runs it
//! through the incremental executor, matching the teacher's own
//! `snowflake` binary (a hard-coded example graph) but extended to
//! actually execute it rather than only print it.

use {
    anyhow::{Context, Result},
    clap::Parser,
    glacier_commands::{Command, IoCommand, RawCommand},
    glacier_core::CommandStorage,
    glacier_exec::{Dag, Executor, ExecutorConfig},
    glacier_util::Path,
    std::path::PathBuf,
};

/// Build and run the example command graph incrementally.
#[derive(Parser)]
#[command(name = "glacier", version, about)]
struct Cli {
    /// Maximum number of commands to run concurrently (default: host
    /// parallelism).
    #[arg(long)]
    jobs: Option<usize>,

    /// Treat every command as outdated, ignoring the command database.
    #[arg(long)]
    rebuild_all: bool,

    /// Log each command's outdatedness reason as it is considered.
    #[arg(long)]
    explain: bool,

    /// Tolerate this many command failures before stopping.
    #[arg(long, default_value_t = 0)]
    ignore_errors: usize,

    /// Write a `<hash>.sh`/`.bat` reproduction script for each command
    /// under `<workdir>/rsp/` before running.
    #[arg(long)]
    save_commands: bool,

    /// Print the execution report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Where to keep the command database and build outputs. Defaults to
    /// a fresh temporary directory.
    #[arg(long)]
    workdir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(if cli.explain { "glacier=debug" } else { "glacier=info" })
        .init();

    let _tempdir_guard;
    let workdir = match cli.workdir {
        Some(dir) => dir,
        None => {
            let dir = tempfile::tempdir().context("failed to create a temporary workdir")?;
            let path = dir.path().to_path_buf();
            _tempdir_guard = dir;
            path
        }
    };
    let build_dir = workdir.join("build");
    std::fs::create_dir_all(&build_dir).context("failed to create build directory")?;

    let commands = example_graph(&build_dir);

    if cli.save_commands {
        let rsp_dir = workdir.join("rsp");
        for command in &commands {
            let path = command.io().save(&rsp_dir).context("failed to save command script")?;
            tracing::info!(path = %path.display(), "saved command script");
        }
    }

    let mut storage = CommandStorage::open(&workdir).context("failed to open command database")?;
    let dag = match Dag::build(commands) {
        Ok(dag) => dag,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let config = ExecutorConfig {
        maximum_running_commands: cli
            .jobs
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)),
        ignore_errors: cli.ignore_errors,
        rebuild_all: cli.rebuild_all,
        explain_outdated: cli.explain,
    };
    let executor = Executor::new(dag, config);

    let mut reactor = glacier_reactor::PlatformReactor::new().context("failed to create reactor")?;
    let report = executor.run(&mut reactor, &mut storage);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "executed {} command(s), skipped {} (fresh), {} error(s), {}ms",
            report.executed,
            report.skipped,
            report.errors.len(),
            report.wall_time_ms,
        );
        for error in &report.errors {
            eprintln!("{error}");
        }
    }

    if report.ok() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Two independent compiles feeding a link step — just enough fan-in to
/// exercise the DAG's dependency release and the reactor's concurrency
/// cap with one demo graph. A shell one-liner stands in for a real
/// compiler/linker invocation, the same way the teacher's own demo binary
/// hardcodes a `sleep` invocation in place of a real build action.
fn example_graph(build_dir: &std::path::Path) -> Vec<Command> {
    let object_a = build_dir.join("a.o");
    let object_b = build_dir.join("b.o");
    let artifact = build_dir.join("app");

    let compile_a = IoCommand::new(shell(&format!("echo object-a > {}", object_a.display())))
        .named("compile a.c")
        .output(Path::from(object_a.as_path()));
    let compile_b = IoCommand::new(shell(&format!("echo object-b > {}", object_b.display())))
        .named("compile b.c")
        .output(Path::from(object_b.as_path()));
    let link = IoCommand::new(shell(&format!(
        "cat {} {} > {}",
        object_a.display(),
        object_b.display(),
        artifact.display()
    )))
    .named("link app")
    .input(Path::from(object_a.as_path()))
    .input(Path::from(object_b.as_path()))
    .output(Path::from(artifact.as_path()));

    vec![Command::Io(compile_a), Command::Io(compile_b), Command::Io(link)]
}

fn shell(script: &str) -> RawCommand {
    RawCommand::new("sh").arg("-c").arg(script.to_owned())
}
