//! bert-layout: train or interactively sample a layout-generation model.

use bert_layout_core::{
    ConfigSource, JsonLayoutRenderer, LayoutError, LocalWorkUnit, PromptedLines, RemoteBackend,
    RunDispatcher, RunMode, RunOutcome, RunRequest, TrainerRegistry, WorkerBackend, load_config,
    parse_override,
};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const TARGET_ENV: &str = "BERT_LAYOUT_BACKEND_TARGET";
const PLATFORM_ENV: &str = "BERT_LAYOUT_BACKEND_PLATFORM";

/// Train or sample a BERT-layout experiment.
#[derive(Parser, Debug)]
#[command(name = "bert-layout", version, about, long_about = None)]
struct Cli {
    /// Configuration file, or `family:<name>` for a built-in family
    #[arg(short, long)]
    config: String,

    /// Directory for checkpoints, logs, and samples
    #[arg(short, long)]
    workdir: PathBuf,

    /// Run mode: train or test
    #[arg(short, long, default_value = "train")]
    mode: String,

    /// Override a configuration value (repeatable), e.g. --set batch_size=32
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Address of a remote accelerator backend
    #[arg(long, env = TARGET_ENV)]
    backend_target: Option<String>,

    /// Platform of the remote accelerator backend
    #[arg(long, env = PLATFORM_ENV)]
    backend_platform: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn remote(&self) -> RemoteBackend {
        RemoteBackend {
            target: self.backend_target.clone(),
            platform: self.backend_platform.clone(),
        }
    }

    /// Environment forwarded to the worker process.
    fn worker_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Some(target) = &self.backend_target {
            env.insert(TARGET_ENV.to_string(), target.clone());
        }
        if let Some(platform) = &self.backend_platform {
            env.insert(PLATFORM_ENV.to_string(), platform.clone());
        }
        env
    }

    fn filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Human-readable stderr plus JSON lines under `<workdir>/logs`.
fn init_tracing(cli: &Cli) -> anyhow::Result<WorkerGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(cli.filter()));

    let log_dir = cli.workdir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "bert-layout.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()?;
    Ok(guard)
}

/// Checks that need no filesystem or process side effects.
fn preflight(cli: &Cli) -> Result<RunMode, LayoutError> {
    Ok(RunMode::parse(&cli.mode)?)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let source = ConfigSource::parse(&cli.config);
    let overrides = cli
        .overrides
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(LayoutError::from)?;
    let config = load_config(&source, &overrides).map_err(LayoutError::from)?;
    info!(
        %source,
        experiment = %config.experiment,
        model_class = %config.model_class,
        overrides = overrides.len(),
        "Loaded configuration"
    );

    let backend =
        WorkerBackend::spawn(&config.backend, &cli.worker_env()).map_err(LayoutError::from)?;
    let work_unit = LocalWorkUnit::open(&cli.workdir)?;
    let renderer = JsonLayoutRenderer::in_workdir(&cli.workdir);

    let mut dispatcher = RunDispatcher::new(
        TrainerRegistry::with_defaults(),
        Arc::new(backend),
        Arc::new(work_unit),
        Arc::new(renderer),
    )
    .with_remote(cli.remote());

    let request = RunRequest::new(config, cli.workdir.clone(), cli.mode.clone());
    match dispatcher.run(&request, &mut PromptedLines::stdio()).await? {
        RunOutcome::Trained(metrics) => info!(
            steps = metrics.steps_completed,
            best_eval_loss = ?metrics.best_eval_loss,
            workdir = %display_path(&request.workdir),
            "Training complete"
        ),
        RunOutcome::Sampled(summary) => info!(
            sampled = summary.sampled.len(),
            invalid_inputs = summary.invalid_inputs,
            "Sampling complete"
        ),
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Process exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<LayoutError>()
        .map(LayoutError::exit_code)
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Before logging setup, which creates `<workdir>/logs`.
    if let Err(e) = preflight(&cli) {
        eprintln!("Error: {e}");
        return ExitCode::from(e.exit_code());
    }

    let _guard = match init_tracing(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
