use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use azdiag::agent::diagnostic::DiagnosticAgent;
use azdiag::agent::openai::ChatClient;
use azdiag::agent::resolution::ResolutionAgent;
use azdiag::azure::client::AzureClient;
use azdiag::config::Config;
use azdiag::metrics::AgentMetrics;
use azdiag::pipeline::Pipeline;

/// Version injected at compile time via AZDIAG_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("AZDIAG_VERSION") {
    Some(v) => v,
    None => "dev",
};

const BANNER: &str = "\
============================================================
  azdiag - Azure VM connectivity diagnostic agent
  Detects and fixes RDP (port 3389) reachability issues
============================================================";

/// Diagnostic and remediation agent for Azure VM connectivity
#[derive(Parser, Debug)]
#[command(name = "azdiag", version = VERSION, about, long_about = None)]
struct Args {
    /// Azure subscription to inspect
    #[arg(short, long)]
    subscription: Option<String>,

    /// Resource group holding the network security group
    #[arg(short = 'g', long)]
    resource_group: Option<String>,

    /// Network security group to inspect
    #[arg(long)]
    nsg: Option<String>,

    /// Force an access mode (offline, delegated, noninteractive, auto)
    #[arg(short, long)]
    mode: Option<String>,

    /// Write the RDP allow rule when the inspection finds it missing
    #[arg(long)]
    apply: bool,

    /// Skip the reasoning backend even when an API key is configured
    #[arg(long)]
    no_ai: bool,

    /// Keep serving /metrics after the run completes
    #[arg(long)]
    serve_metrics: bool,

    /// Port for the metrics server
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return None;
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("Failed to open log file");

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("azdiag started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("azdiag").join("azdiag.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".azdiag").join("azdiag.log");
    }
    PathBuf::from("azdiag.log")
}

fn apply_cli_overrides(config: &mut Config, args: &Args) {
    if let Some(v) = &args.subscription {
        config.subscription_id = v.clone();
    }
    if let Some(v) = &args.resource_group {
        config.resource_group = v.clone();
    }
    if let Some(v) = &args.nsg {
        config.security_group = v.clone();
    }
    if let Some(v) = &args.mode {
        config.forced_mode = Some(v.clone());
    }
    if let Some(v) = args.metrics_port {
        config.metrics_port = v;
    }
}

/// Construct the reasoning agents, or none for offline runs and --no-ai.
/// A live run that wants the backend but has no key is the one
/// configuration error treated as fatal.
fn build_agents(
    client: &AzureClient,
    config: &Config,
    no_ai: bool,
    metrics: &AgentMetrics,
) -> Result<(Option<DiagnosticAgent>, Option<ResolutionAgent>)> {
    if no_ai || client.is_simulating() {
        tracing::info!("Skipping reasoning agent initialization");
        return Ok((None, None));
    }

    let Some(api_key) = config.openai_api_key.as_deref() else {
        anyhow::bail!("OPENAI_API_KEY is not set; export it or re-run with --no-ai");
    };

    let chat = ChatClient::new(api_key, &config.openai_model);
    Ok((
        Some(DiagnosticAgent::new(chat.clone(), metrics.clone())),
        Some(ResolutionAgent::new(chat, metrics.clone())),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    println!("{}", BANNER);

    let mut config = Config::from_env();
    apply_cli_overrides(&mut config, &args);

    tracing::info!(
        subscription = %config.subscription_id,
        resource_group = %config.resource_group,
        nsg = %config.security_group,
        "Starting azdiag {}",
        VERSION
    );

    let metrics = AgentMetrics::new()?;

    let client = AzureClient::connect(&config, metrics.clone()).await?;
    let (diagnostic, resolution) = build_agents(&client, &config, args.no_ai, &metrics)?;

    let pipeline = Pipeline::new(
        client,
        diagnostic,
        resolution,
        metrics.clone(),
        &config,
        args.apply,
    );
    let report = pipeline.run().await;

    tracing::info!(
        vms = report.vm_count,
        simulated = report.simulated,
        duration_secs = report.duration.as_secs_f64(),
        "Run complete"
    );

    if args.serve_metrics {
        println!(
            "\nServing metrics on http://localhost:{}/metrics (ctrl-c to stop)",
            config.metrics_port
        );
        tokio::select! {
            result = azdiag::metrics::serve(metrics.clone(), config.metrics_port) => result?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
            }
        }
    }

    Ok(())
}
