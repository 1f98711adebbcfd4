//! Reproducible pipeline runner.
//!
//! Executes the steps listed in a pipeline file into a fresh run directory,
//! links outputs of an earlier run for the steps it skips, and stamps the
//! result with the current git revision.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::warn;

use reprun::core::step_ref::StepRef;
use reprun::core::types::RunRecord;
use reprun::exit_codes;
use reprun::io::config::{DEFAULT_CONFIG_FILE, ProjectConfig, load_config};
use reprun::io::executor::{ScriptRunner, StepError};
use reprun::io::git::Git;
use reprun::io::history::scan_runs;
use reprun::io::pipeline_spec::load_pipeline;
use reprun::logging;
use reprun::pipeline::{RunOutcome, run_pipeline};
use reprun::request::RunRequest;
use reprun::single::{ExecRequest, run_single};

#[derive(Parser)]
#[command(
    name = "reprun",
    version,
    about = "Run a pipeline of scripts into version-stamped result directories"
)]
struct Cli {
    /// Project config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute the pipeline, or part of it, into a new run directory.
    Run(RunArgs),
    /// List the runs in the results directory.
    Runs {
        /// Results directory (overrides the config file).
        #[arg(short = 'R', long)]
        results: Option<PathBuf>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Run a single script and stamp the directory named by its last line of output.
    Exec {
        /// Run even if files under reproducibility control are not committed.
        #[arg(long)]
        force: bool,
        /// List of files under reproducibility control.
        #[arg(short, long)]
        reproducible: Option<PathBuf>,
        script: PathBuf,
        /// Arguments passed to the script.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Name of the run directory (default: a timestamp).
    #[arg(short, long)]
    output: Option<String>,
    /// Results directory.
    #[arg(short = 'R', long)]
    results: Option<PathBuf>,
    /// List of files under reproducibility control.
    #[arg(short, long)]
    reproducible: Option<PathBuf>,
    /// Pipeline specification file.
    #[arg(short, long)]
    pipeline: Option<PathBuf>,
    /// First step to run (1-based ordinal or step name).
    #[arg(long, value_name = "STEP")]
    from: Option<StepRef>,
    /// Last step to run (1-based ordinal or step name).
    #[arg(long, value_name = "STEP")]
    to: Option<StepRef>,
    /// Run exactly one step.
    #[arg(long, value_name = "STEP", conflicts_with_all = ["from", "to"])]
    only: Option<StepRef>,
    /// Previous run to continue from.
    #[arg(long = "with", value_name = "RUN")]
    with: Option<String>,
    /// Continue the most recent usable run after its last completed step.
    #[arg(long = "continue", conflicts_with = "everything")]
    continue_previous: bool,
    /// Rebuild every step from scratch.
    #[arg(long)]
    everything: bool,
    /// Allow running steps whose inputs are missing from the previous run.
    #[arg(long)]
    ignore_missing_output: bool,
    /// Also link steps after the last one run.
    #[arg(long)]
    link_future: bool,
    /// Seal the run so it is never continued.
    #[arg(long = "final")]
    finalize: bool,
    /// Run even if files under reproducibility control are not committed.
    /// The run is sealed.
    #[arg(long)]
    force: bool,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        let step_failed = err.chain().any(|cause| cause.is::<StepError>());
        if step_failed {
            eprintln!("a step in the pipeline failed: {:#}", err);
            std::process::exit(exit_codes::STEP_FAILED);
        }
        eprintln!("the pipeline failed to start: {:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(&cli.config, args),
        Command::Runs { results, json } => cmd_runs(&cli.config, results, json),
        Command::Exec {
            force,
            reproducible,
            script,
            args,
        } => cmd_exec(&cli.config, force, reproducible, script, args),
    }
}

fn cmd_run(config_path: &Path, args: RunArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let invocation: Vec<String> = std::env::args().skip(1).collect();
    let request = build_request(config, args, invocation)?;

    let git = Git::new(".");
    println!("run directory: {}", request.run_dir().display());
    let outcome = run_pipeline(&request, &git, &ScriptRunner)?;
    print_outcome(&outcome);
    Ok(())
}

fn build_request(
    config: ProjectConfig,
    args: RunArgs,
    invocation: Vec<String>,
) -> Result<RunRequest> {
    let mut builder = RunRequest::builder(config)
        .continue_previous(args.continue_previous)
        .rebuild(args.everything)
        .ignore_missing_output(args.ignore_missing_output)
        .link_future(args.link_future)
        .finalize(args.finalize)
        .force(args.force)
        .invocation(invocation);
    if let Some(dir) = args.results {
        builder = builder.results_dir(dir);
    }
    if let Some(list) = args.reproducible {
        builder = builder.reproducible_list(list);
    }
    if let Some(spec) = args.pipeline {
        builder = builder.pipeline_file(spec);
    }
    if let Some(name) = args.output {
        builder = builder.run_name(name);
    }
    if let Some(step) = args.from {
        builder = builder.from(step);
    }
    if let Some(step) = args.to {
        builder = builder.to(step);
    }
    if let Some(step) = args.only {
        builder = builder.only(step);
    }
    if let Some(prev) = args.with {
        builder = builder.previous_run(prev);
    }
    builder.build()
}

fn print_outcome(outcome: &RunOutcome) {
    match &outcome.previous_run {
        Some(prev) => println!("previous run: {prev}"),
        None => println!("previous run: none"),
    }
    println!("steps run: {}", outcome.range);
    for link in &outcome.linked {
        println!("linked {} from {}", link.step, link.source_run);
    }
    for step in &outcome.unlinked {
        println!("no output to link for {step}");
    }
    let mut stamp = outcome.revision.clone();
    if !outcome.clean {
        stamp.push_str(" (NOT CLEAN)");
    }
    println!("revision: {stamp}");
    if outcome.sealed {
        println!("run sealed as final");
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    name: String,
    status: String,
    steps: usize,
    modified: String,
    /// Default inference would continue from this run.
    candidate: bool,
}

impl RunSummary {
    fn new(record: &RunRecord, candidate: Option<&str>) -> Self {
        Self {
            name: record.name.clone(),
            status: record.status.to_string(),
            steps: record.completed_step_count(),
            modified: record.modified.to_rfc3339(),
            candidate: candidate == Some(record.name.as_str()),
        }
    }
}

fn cmd_runs(config_path: &Path, results: Option<PathBuf>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let results = results.unwrap_or(config.results_dir);
    // Without a readable pipeline every subdirectory counts as a step.
    let pipeline = match load_pipeline(&config.pipeline_file) {
        Ok(pipeline) => Some(pipeline),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "listing runs without a pipeline");
            None
        }
    };
    let history = scan_runs(&results, pipeline.as_ref())?;
    let candidate = history.most_recent_usable_run().map(|run| run.name.as_str());
    let summaries: Vec<RunSummary> = history
        .runs()
        .iter()
        .map(|record| RunSummary::new(record, candidate))
        .collect();

    if json {
        let payload = serde_json::to_string_pretty(&summaries).context("serialize runs")?;
        println!("{payload}");
        return Ok(());
    }
    for summary in &summaries {
        let marker = if summary.candidate { "*" } else { " " };
        println!(
            "{marker} {:<32} {:<18} {:>3} steps  {}",
            summary.name, summary.status, summary.steps, summary.modified
        );
    }
    Ok(())
}

fn cmd_exec(
    config_path: &Path,
    force: bool,
    reproducible: Option<PathBuf>,
    script: PathBuf,
    args: Vec<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let request = ExecRequest {
        script,
        args,
        reproducible_list: reproducible.unwrap_or(config.reproducible_list),
        force,
    };
    let git = Git::new(".");
    let outcome = run_single(&request, &git, &mut std::io::stdout().lock())?;
    println!(
        "stamped {} with {}{}",
        outcome.experiment_dir.display(),
        outcome.revision,
        if outcome.clean { "" } else { " (NOT CLEAN)" }
    );
    Ok(())
}
