use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod collector;
mod convert;
mod models;
mod shutdown;
mod stream;

use api::AzureClient;
use collector::{CollectOutcome, Collector, RunWindow};
use stream::StreamWriter;

const ARTIFACT_FILE: &str = "output.json";

#[derive(Parser)]
#[command(name = "aci-monitor")]
#[command(author, version, about = "Record Azure Container Instances quota usage over a timed window")]
struct Cli {
    /// Azure service principal client id
    #[arg(long, env = "CLIENT_ID")]
    client_id: String,

    /// Azure service principal client secret
    #[arg(long, env = "CLIENT_SECRET")]
    client_secret: String,

    /// Subscription holding the monitored container instances
    #[arg(long, env = "SUBSCRIPTION_ID")]
    subscription_id: String,

    /// Directory (tenant) the service principal lives in
    #[arg(long, env = "TENANT_ID")]
    tenant_id: String,

    /// Region whose quota usage is recorded
    #[arg(long, env = "REGION")]
    region: String,

    /// Seconds to sleep between polling cycles
    #[arg(long, default_value_t = 10)]
    sleep_seconds: u64,

    /// Folder the JSON and CSV artifacts are written to
    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// Minutes to run before converting the collected data
    #[arg(value_parser = clap::value_parser!(i64).range(0..))]
    mins_to_run: i64,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    tracing::info!("Container monitoring started");

    prepare_output_dir(&cli.output)?;

    let window = RunWindow::new(Utc::now(), chrono::Duration::minutes(cli.mins_to_run));
    tracing::info!(
        "Run will finish at {}",
        window.deadline().format("%Y-%m-%d %H:%M:%S UTC")
    );

    let api = AzureClient::new(
        &cli.tenant_id,
        cli.client_id,
        cli.client_secret,
        &cli.subscription_id,
        &cli.region,
    );
    let mut collector = Collector::new(api, Duration::from_secs(cli.sleep_seconds));
    let shutdown = shutdown::install();

    let artifact = cli.output.join(ARTIFACT_FILE);
    let mut stream =
        StreamWriter::create(&artifact).context("failed to open the usage artifact")?;

    tracing::info!("Starting data collection");
    let outcome = collector.run(&window, &mut stream, &shutdown).await?;

    match outcome {
        CollectOutcome::Completed { cycles } => {
            stream
                .close()
                .context("failed to close the usage artifact")?;
            tracing::info!(cycles, "Data collection finished");

            let raw = std::fs::read_to_string(&artifact)
                .context("failed to read the usage artifact back")?;
            convert::convert(&cli.output, &raw)?;
        }
        CollectOutcome::Interrupted { cycles } => {
            drop(stream);
            tracing::info!(cycles, "Data collection interrupted");

            let raw = stream::repair(&artifact)?;

            let stdin = io::stdin();
            let confirmed =
                convert::confirm_conversion(&mut stdin.lock(), &mut io::stdout())?;
            if confirmed {
                convert::convert(&cli.output, &raw)?;
            } else {
                tracing::info!("Leaving collected JSON unconverted");
            }
        }
    }

    Ok(())
}

/// Wipe and recreate the output folder so every run starts clean.
fn prepare_output_dir(path: &Path) -> Result<()> {
    if let Err(err) = std::fs::remove_dir_all(path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::warn!(error = %err, "Could not clear the previous output folder");
        }
    }

    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create output folder {}", path.display()))
}
