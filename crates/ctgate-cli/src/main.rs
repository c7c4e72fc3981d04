//! ctgate - container validation harness CLI
//!
//! The `ctgate` command starts an image under a hardened security profile,
//! checks its HTTP, logging and security contract, and always removes the
//! container again.
//!
//! ## Commands
//!
//! - `run`: run every check and print a transcript
//! - `show-config`: print the resolved configuration

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ctgate_core::{HarnessConfig, HarnessError};
use ctgate_harness::{render_banner, render_transcript_line, write_report_json, Harness};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "ctgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Container validation harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the image and run every check against it
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Write the JSON run report to this path
        #[arg(long, env = "CTGATE_REPORT")]
        report: Option<PathBuf>,
    },

    /// Print the resolved configuration as JSON
    ShowConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

/// Overrides applied on top of `CTGATE_*` environment variables and defaults.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Image to validate
    #[arg(long)]
    image: Option<String>,

    /// Name given to the container under test
    #[arg(long)]
    name: Option<String>,

    /// Host port the container port is published on
    #[arg(long)]
    host_port: Option<u16>,

    /// Port the application listens on inside the container
    #[arg(long)]
    container_port: Option<u16>,

    /// Maximum total wait for the container to come up (ms)
    #[arg(long)]
    settle_timeout_ms: Option<u64>,

    /// Per-request HTTP timeout (ms)
    #[arg(long)]
    http_timeout_ms: Option<u64>,

    /// First readiness poll delay (ms)
    #[arg(long)]
    backoff_base_ms: Option<u64>,

    /// Largest readiness poll delay (ms)
    #[arg(long)]
    backoff_max_ms: Option<u64>,

    /// How long the container must stay up after it is first seen running (ms)
    #[arg(long)]
    stable_window_ms: Option<u64>,

    /// User the container process must run as
    #[arg(long)]
    expected_user: Option<String>,

    /// Numeric uid the container process must run as
    #[arg(long)]
    expected_uid: Option<u32>,

    /// Counter series required on the metrics endpoint
    #[arg(long)]
    metrics_series: Option<String>,
}

impl ConfigArgs {
    fn resolve(self) -> Result<HarnessConfig, HarnessError> {
        let mut config = HarnessConfig::from_env()?;
        if let Some(v) = self.image {
            config.image = v;
        }
        if let Some(v) = self.name {
            config.container_name = v;
        }
        if let Some(v) = self.host_port {
            config.host_port = v;
        }
        if let Some(v) = self.container_port {
            config.container_port = v;
        }
        if let Some(v) = self.settle_timeout_ms {
            config.settle_timeout_ms = v;
        }
        if let Some(v) = self.http_timeout_ms {
            config.http_timeout_ms = v;
        }
        if let Some(v) = self.backoff_base_ms {
            config.backoff_base_ms = v;
        }
        if let Some(v) = self.backoff_max_ms {
            config.backoff_max_ms = v;
        }
        if let Some(v) = self.stable_window_ms {
            config.stable_window_ms = v;
        }
        if let Some(v) = self.expected_user {
            config.expected_user = v;
        }
        if let Some(v) = self.expected_uid {
            config.expected_uid = v;
        }
        if let Some(v) = self.metrics_series {
            config.metrics_series = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ctgate_core::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Run { config, report } => cmd_run(config, report).await,
        Commands::ShowConfig { config } => cmd_show_config(config),
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("✗ {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Exit code for an error that escaped a command.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<HarnessError>()
        .map(HarnessError::exit_code)
        .unwrap_or(1)
}

async fn cmd_run(args: ConfigArgs, report_path: Option<PathBuf>) -> Result<u8> {
    let config = args.resolve()?;

    println!("Validating image: {}", config.image);
    println!("Container: {} ({})", config.container_name, config.port_mapping());
    println!();

    let harness = Harness::with_docker(config)?;
    let report = harness
        .run_until_interrupted(|result| println!("{}", render_transcript_line(result)))
        .await?;

    println!();
    println!("{}", render_banner(&report));
    if let Some(failure) = &report.failure {
        println!("  {}", failure.message);
    }

    if let Some(path) = report_path {
        write_report_json(&path, &report)
            .with_context(|| format!("Failed to write run report to {:?}", path))?;
        info!(path = ?path, "Run report written");
    }

    Ok(report.exit_code())
}

fn cmd_show_config(args: ConfigArgs) -> Result<u8> {
    let config = args.resolve()?;
    let rendered = serde_json::to_string_pretty(&config.display())
        .context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(0)
}
