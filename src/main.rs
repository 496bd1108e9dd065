use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use mmflow::config::Config;
use mmflow::oracle::{CommandOracle, ScriptedOracle, TextOracle};
use mmflow::sandbox::ProcessExecutor;
use mmflow::workflow::{Planner, RunId, Workflow};
use mmflow::{mlog, mlog_warn, Error, Result};

/// mmflow - task graph construction and ordered execution for modeling problems
#[derive(Parser, Debug)]
#[command(name = "mmflow")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    MMFLOW_DEBUG=1  Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.mmflow/mmflow.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ProblemArgs {
    /// Problem text
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    pub problem: Option<String>,

    /// Read the problem text from a file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Replay oracle completions from a JSON file instead of calling the oracle
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Write the JSON result to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Plan and execute every task, printing the run report
    Run {
        #[command(flatten)]
        input: ProblemArgs,

        /// Abort the stage pipeline after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Skip the closing sections
        #[arg(long)]
        no_closing: bool,
    },

    /// Extract tasks, analyze dependencies and print the execution order
    Plan {
        #[command(flatten)]
        input: ProblemArgs,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    mmflow::log::init(cli.debug);
    mlog!("mmflow starting");

    let config = Config::load()?;
    match cli.command {
        Command::Run {
            input,
            timeout,
            no_closing,
        } => {
            let mut config = config;
            if timeout.is_some() {
                config.run_timeout_secs = timeout;
            }
            if no_closing {
                config.render_closing_sections = false;
            }
            config.validate()?;
            run(config, input)
        }
        Command::Plan { input } => plan(&config, input),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn read_problem(input: &ProblemArgs) -> Result<String> {
    let text = match (&input.problem, &input.file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => String::new(),
    };
    if text.trim().is_empty() {
        return Err(Error::Validation("problem text is empty".to_string()));
    }
    Ok(text)
}

fn build_oracle(config: &Config, replay: Option<&Path>) -> Result<Arc<dyn TextOracle>> {
    match replay {
        Some(path) => Ok(Arc::new(ScriptedOracle::from_file(path)?)),
        None => Ok(Arc::new(CommandOracle::from_command_line(
            config.effective_oracle_command(),
            config.oracle_timeout(),
        )?)),
    }
}

fn emit(json: String, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{}", json),
    }
    Ok(())
}

fn run(config: Config, input: ProblemArgs) -> Result<()> {
    let problem = read_problem(&input)?;
    let oracle = build_oracle(&config, input.replay.as_deref())?;

    let run_id = RunId::new();
    let run_dir = config.runs_dir()?.join(run_id.short());
    let executor = Arc::new(ProcessExecutor::new(
        config.effective_interpreter(),
        run_dir.clone(),
        config.code_timeout(),
    )?);
    mlog!("Run command: run={} dir={}", run_id.short(), run_dir.display());

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let workflow = Workflow::new(config, oracle, executor).with_run_id(run_id);
        let cancel = workflow.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                mlog!("Interrupted, cancelling run");
                cancel.cancel();
            }
        });
        workflow.execute(&problem).await
    })?;
    rt.shutdown_timeout(Duration::from_millis(100));

    if let Err(e) = report.save(&run_dir) {
        mlog_warn!("Failed to save run report: {}", e);
    }
    emit(report.to_json()?, input.output.as_deref())?;
    run_outcome(report.error.as_deref())
}

/// Turn a finished report's error into the process result.
fn run_outcome(error: Option<&str>) -> Result<()> {
    match error {
        Some(message) => Err(Error::RunFailed(message.to_string())),
        None => Ok(()),
    }
}

fn plan(config: &Config, input: ProblemArgs) -> Result<()> {
    let problem = read_problem(&input)?;
    let oracle = build_oracle(config, input.replay.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    let plan = rt.block_on(async { Planner::new(oracle).plan(&problem).await })?;
    emit(serde_json::to_string_pretty(&plan)?, input.output.as_deref())
}
