//! Root-cause analysis over telemetry with validated generated code.
//!
//! `rca diagnose` runs one session: a planner drafts a plan, a router sends
//! tasks to per-modality explorers, generators write analysis code that a
//! gate executes and checks, and a reasoner names the root cause.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rca::core::cancel::CancellationToken;
use rca::exit_codes;
use rca::io::config::{DEFAULT_CONFIG_PATH, RcaConfig, load_config, write_config};
use rca::io::model::CommandModel;
use rca::io::sandbox::ProcessSandbox;
use rca::logging;
use rca::session::{SessionBackends, run_session};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "rca",
    version,
    about = "Root-cause analysis with generated, validated analysis code"
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug); `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Load and validate the config.
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Run one diagnosis session and print the final result.
    Diagnose {
        /// Problem description to diagnose.
        #[arg(long)]
        query: String,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Directory for `report.json` and transcripts.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::CheckConfig { config } => cmd_check_config(&config),
        Command::Diagnose { query, config, out } => cmd_diagnose(&query, &config, out.as_deref()),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &RcaConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check_config(path: &Path) -> Result<i32> {
    let cfg = load_config(path)?;
    let policies = cfg.quality_policies();
    println!(
        "config ok: profile={:?} max_rounds={} max_refine_attempts={} trace_max_events={}",
        cfg.profile, cfg.max_rounds, cfg.max_refine_attempts, policies.trace.max_events
    );
    Ok(exit_codes::OK)
}

fn cmd_diagnose(query: &str, config: &Path, out: Option<&Path>) -> Result<i32> {
    if query.trim().is_empty() {
        bail!("--query must not be empty");
    }
    let cfg = load_config(config)?;
    if let Some(parent) = cfg.toolset.path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create toolset dir {}", parent.display()))?;
    }

    let cancel = CancellationToken::new();
    let backends = SessionBackends {
        agent_model: Rc::new(CommandModel::new(cfg.models.agent.clone(), cancel.clone())),
        coder_model: Rc::new(CommandModel::new(cfg.models.coder.clone(), cancel.clone())),
        sandbox: Box::new(ProcessSandbox::new(&cfg.sandbox)?),
    };

    let outcome = run_session(&cfg, query, backends, cancel);
    if let Some(dir) = out {
        let paths = outcome.write_report(dir)?;
        info!(report = %paths.report_path.display(), "session report written");
    }

    println!("{}", outcome.final_result);
    Ok(if outcome.placeholder {
        exit_codes::PLACEHOLDER
    } else {
        exit_codes::OK
    })
}
