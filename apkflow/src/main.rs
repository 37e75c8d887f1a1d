use anyhow::{Context, Result};
use apkflow::api::Apkflow;
use apkflow::cancellation::CancellationToken;
use apkflow::config::ApkflowConfig;
use apkflow::errors::{AmbiguityError, ApkflowError};
use apkflow::observability::{init_tracing, LogFormat};
use apkflow::pipeline::{PipelineReport, RunOutcome};
use apkflow::resolver::{InteractiveTerminal, ResolveOptions, ResolvedTarget, Unattended};
use apkflow::tools::DecompileEngine;
use apkflow::workflows::{WorkflowKind, WorkflowOptions};
use apkflow::workspace::{LedgerSnapshot, WorkspaceKey};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const EXIT_HALTED: u8 = 1;
const EXIT_AMBIGUOUS: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "apkflow",
    version,
    about = "Resumable Android reverse-engineering workflows",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.apkflow/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding workspaces
    #[arg(long, global = true, value_name = "DIR")]
    workspace_root: Option<PathBuf>,

    /// Log line format: compact or json
    #[arg(long, global = true, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices known to adb
    Devices(DevicesArgs),
    /// Resolve a query to one installed package
    Resolve(ResolveArgs),
    /// Run a workflow against a package
    Run(RunArgs),
    /// Show the ledger of a package workspace
    Status(StatusArgs),
    /// Remove the artifacts of a package workspace
    Clean(CleanArgs),
}

#[derive(Args, Debug)]
struct DevicesArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Device serial; required when several devices are online and input is not interactive
    #[arg(long, short = 'd', value_name = "SERIAL")]
    device: Option<String>,

    /// Include system packages
    #[arg(long)]
    system: bool,

    /// Match package names only, not app labels
    #[arg(long)]
    no_labels: bool,

    /// Never prompt; ambiguous matches are listed and the command fails
    #[arg(long)]
    non_interactive: bool,

    /// Pick the N-th candidate (1-based) of an ambiguous match
    #[arg(long, value_name = "N")]
    select: Option<usize>,
}

impl TargetArgs {
    fn options(&self) -> ResolveOptions {
        let options = ResolveOptions::default()
            .with_system_packages(self.system)
            .with_label_matching(!self.no_labels);
        match &self.device {
            Some(device) => options.with_device(device),
            None => options,
        }
    }

    fn interactive(&self) -> bool {
        !self.non_interactive && self.select.is_none() && std::io::stdin().is_terminal()
    }
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Package name, name fragment or app label
    query: String,

    #[command(flatten)]
    target: TargetArgs,

    /// Emit machine-readable JSON output
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Workflow name: instrument or decompile
    workflow: String,

    /// Package name, name fragment or app label
    query: String,

    #[command(flatten)]
    target: TargetArgs,

    /// Patch even if the app does not look like Flutter
    #[arg(long)]
    force: bool,

    /// Do not start the app with its launcher intent
    #[arg(long)]
    no_launch: bool,

    /// Wait for the operator to start the app
    #[arg(long, conflicts_with = "no_launch")]
    manual_start: bool,

    /// Stop after installing the patched app
    #[arg(long)]
    skip_dump: bool,

    /// Seconds to wait after launching before reading the dump
    #[arg(long, value_name = "SECS", default_value_t = 8)]
    launch_settle: u64,

    /// Decompiler for the decompile workflow: jadx or apktool
    #[arg(long, default_value_t = DecompileEngine::Jadx)]
    engine: DecompileEngine,

    /// Emit machine-readable JSON output
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn workflow_options(&self) -> WorkflowOptions {
        let mut options = WorkflowOptions::default();
        options.instrument = options
            .instrument
            .with_force(self.force)
            .with_auto_launch(!self.no_launch)
            .with_manual_start(self.manual_start)
            .with_skip_dump(self.skip_dump)
            .with_launch_settle(Duration::from_secs(self.launch_settle));
        options.decompile = options.decompile.with_engine(self.engine);
        options
    }
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Exact package name
    package: String,

    /// Emit machine-readable JSON output
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CleanArgs {
    /// Exact package name
    package: String,

    /// Delete the whole workspace, ledger included
    #[arg(long)]
    force: bool,

    /// Emit machine-readable JSON output
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ApkflowConfig::load(cli.config.as_deref());
    if let Some(root) = cli.workspace_root {
        config = config.with_workspace_root(root);
    }
    let apkflow = Apkflow::from_config(config);

    match cli.command {
        Commands::Devices(args) => {
            let devices = apkflow.devices().await?;
            if args.json {
                print_json(&devices)?;
            } else if devices.is_empty() {
                println!("No devices");
            } else {
                for device in &devices {
                    println!(
                        "{}\t{}\t{}",
                        device.id,
                        device.state,
                        device.model.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve(args) => {
            let apkflow = with_interaction(apkflow, &args.target);
            match resolve(&apkflow, &args.query, &args.target, args.json).await? {
                Ok(target) => {
                    if args.json {
                        print_json(&target)?;
                    } else {
                        print_target(&target);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(code) => Ok(code),
            }
        }
        Commands::Run(args) => {
            let kind: WorkflowKind = args.workflow.parse()?;
            let apkflow = with_interaction(apkflow, &args.target);
            let target = match resolve(&apkflow, &args.query, &args.target, args.json).await? {
                Ok(target) => target,
                Err(code) => return Ok(code),
            };
            if !args.json {
                print_target(&target);
            }

            let token = Arc::new(CancellationToken::new());
            let signal_token = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nInterrupt received; stopping after the current stage");
                    signal_token.cancel("interrupted by user");
                }
            });

            let report = apkflow
                .run(kind, &target, &args.workflow_options(), token)
                .await
                .with_context(|| format!("{kind} workflow for {}", target.package.name))?;
            if args.json {
                print_json(&report)?;
            } else {
                print!("{report}");
            }
            Ok(exit_code(&report))
        }
        Commands::Status(args) => {
            let snapshot = apkflow.status(&WorkspaceKey::new(&args.package))?;
            if args.json {
                print_json(&snapshot)?;
            } else {
                print_snapshot(&snapshot);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clean(args) => {
            let report = apkflow.clean(&WorkspaceKey::new(&args.package), args.force)?;
            if args.json {
                print_json(&report)?;
            } else if report.removed.is_empty() && report.reset_stages.is_empty() {
                println!("Nothing to clean for {}", report.key);
            } else if report.forced {
                println!("Deleted workspace {}", report.key);
            } else {
                println!(
                    "Cleaned {}: {} paths removed, {} stages reset",
                    report.key,
                    report.removed.len(),
                    report.reset_stages.len()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn with_interaction(apkflow: Apkflow, target: &TargetArgs) -> Apkflow {
    if target.interactive() {
        let terminal = Arc::new(InteractiveTerminal::stdio());
        apkflow
            .with_disambiguator(terminal.clone())
            .with_prompt(terminal)
    } else {
        let unattended = Arc::new(match target.select {
            Some(index) => Unattended::with_selection(index),
            None => Unattended::new(),
        });
        apkflow
            .with_disambiguator(unattended.clone())
            .with_prompt(unattended)
    }
}

/// Resolves the target; an unsettled ambiguity prints the candidates and
/// yields the exit code instead.
async fn resolve(
    apkflow: &Apkflow,
    query: &str,
    target: &TargetArgs,
    json: bool,
) -> Result<Result<ResolvedTarget, ExitCode>> {
    match apkflow.resolve(query, &target.options()).await {
        Ok(resolved) => Ok(Ok(resolved)),
        Err(ApkflowError::Ambiguity(err)) => {
            print_ambiguity(&err, json)?;
            Ok(Err(ExitCode::from(EXIT_AMBIGUOUS)))
        }
        Err(err) => Err(err.into()),
    }
}

fn print_ambiguity(err: &AmbiguityError, json: bool) -> Result<()> {
    if json {
        #[derive(Serialize)]
        struct Ambiguous<'a> {
            error: String,
            query: &'a str,
            kind: String,
            candidates: &'a [apkflow::resolver::Candidate],
        }
        return print_json(&Ambiguous {
            error: err.to_string(),
            query: &err.query,
            kind: err.kind.to_string(),
            candidates: &err.candidates,
        });
    }
    eprintln!("{err}");
    for candidate in &err.candidates {
        eprintln!("  {candidate}");
    }
    eprintln!("Re-run with --select <N> or a more specific query.");
    Ok(())
}

fn print_target(target: &ResolvedTarget) {
    let label = target
        .package
        .label
        .as_deref()
        .map(|l| format!(" ({l})"))
        .unwrap_or_default();
    let kind = if target.package.is_split() {
        format!("split, {} parts", target.package.code_paths.len())
    } else {
        "single APK".to_string()
    };
    println!(
        "{}{label} on {} [{kind}]",
        target.package.name,
        target.device.display_name()
    );
}

fn print_snapshot(snapshot: &LedgerSnapshot) {
    if !snapshot.exists {
        println!("No workspace for {}", snapshot.key);
        return;
    }
    println!("Workspace {} ({})", snapshot.key, snapshot.dir.display());
    if let Some(recovered) = &snapshot.recovered {
        println!("  ledger recovered: {recovered}");
    }
    for (name, entry) in &snapshot.stages {
        print!(
            "  {:<9} {name:<20} {}",
            format!("[{}]", entry.status),
            entry.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(artifact) = &entry.artifact {
            print!("  {}", artifact.path.display());
        }
        if let Some(failure) = &entry.failure {
            print!("  error: {failure}");
        }
        println!();
    }
}

fn exit_code(report: &PipelineReport) -> ExitCode {
    match report.outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Halted { .. } => ExitCode::from(EXIT_HALTED),
        RunOutcome::Cancelled { .. } => ExitCode::from(EXIT_CANCELLED),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
