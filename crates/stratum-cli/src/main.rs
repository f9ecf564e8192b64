//! Stratum CLI - install and reconcile platform components in dependency order

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod display;
mod error;
mod exit_codes;

#[derive(Parser)]
#[command(name = "stratum")]
#[command(version)]
#[command(about = "Install and reconcile platform components in dependency order", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "STRATUM_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Log output format
    #[arg(long, global = true, env = "STRATUM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the operator
    Run(RunArgs),

    /// Show the processing order and the action each component would take
    Plan(PlanArgs),

    /// Print the merged values of one component
    Values(ValuesArgs),
}

/// Files describing what can be installed
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Component catalog
    #[arg(long, env = "STRATUM_CATALOG")]
    pub catalog: PathBuf,

    /// Build manifest with image coordinates
    #[arg(long, env = "STRATUM_MANIFEST")]
    pub manifest: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    /// Namespace to watch (default: all namespaces)
    #[arg(short, long, env = "STRATUM_NAMESPACE")]
    pub namespace: Option<String>,

    /// Path to the helm binary
    #[arg(long, env = "STRATUM_HELM", default_value = "helm")]
    pub helm: PathBuf,

    /// Kubeconfig context passed to helm
    #[arg(long, env = "STRATUM_KUBE_CONTEXT")]
    pub kube_context: Option<String>,

    /// Bound on a single apply or uninstall
    #[arg(long, env = "STRATUM_APPLY_TIMEOUT", default_value = "5m", value_parser = humantime::parse_duration)]
    pub apply_timeout: Duration,

    /// Bound on a single readiness probe
    #[arg(long, env = "STRATUM_READINESS_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub readiness_timeout: Duration,

    /// Delay between passes while components are converging
    #[arg(long, env = "STRATUM_REQUEUE_INTERVAL", default_value = "10s", value_parser = humantime::parse_duration)]
    pub requeue_interval: Duration,

    /// Delay between passes once everything is ready
    #[arg(long, env = "STRATUM_RESYNC_INTERVAL", default_value = "5m", value_parser = humantime::parse_duration)]
    pub resync_interval: Duration,

    /// Consecutive transient failures before a component is marked Failed (0 = never)
    #[arg(long, env = "STRATUM_MAX_FAILURES", default_value_t = 0)]
    pub max_failures: u32,

    /// Namespace the operator runs in
    #[arg(long, env = "STRATUM_OPERATOR_NAMESPACE", default_value = "stratum-system")]
    pub operator_namespace: String,

    /// Label selector matching operator pods
    #[arg(
        long,
        env = "STRATUM_OPERATOR_SELECTOR",
        default_value = "app.kubernetes.io/name=stratum-operator"
    )]
    pub operator_selector: String,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub sources: SourceArgs,

    /// Effective configuration, either a bare spec or a Platform object
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Recorded status to plan against (default: nothing installed)
    #[arg(long)]
    pub status: Option<PathBuf>,

    /// Plan the uninstall instead
    #[arg(long)]
    pub uninstall: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Args, Debug)]
pub struct ValuesArgs {
    /// Component name
    pub component: String,

    #[command(flatten)]
    pub sources: SourceArgs,

    /// Effective configuration, either a bare spec or a Platform object
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Set values on command line (key=value), applied last
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Yaml,
    Json,
}

fn init_tracing(level: Level, format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (text, json) = match format {
        LogFormat::Text => (
            Some(fmt::layer().with_target(true).with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(text)
        .with(json)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.log_level, cli.log_format);

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Plan(args) => commands::plan::run(&args),
        Commands::Values(args) => commands::values::run(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
