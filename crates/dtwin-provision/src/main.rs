//! CLI entry point for the dtwin-provision workflow.
//!
//! Progress goes to stdout; tracing diagnostics go to stderr.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use dtwin_core::config::DEFAULT_FILE_PREFIX;
use dtwin_core::ModelDocument;

use dtwin_provision::{connect, Console, Provisioner, Settings};

#[derive(Parser)]
#[command(name = "dtwin-provision")]
#[command(about = "Register a model, create sample twins and relationships, and run a query")]
struct Cli {
    /// Config file prefix (default: dtwin).
    #[arg(short, long, default_value = DEFAULT_FILE_PREFIX)]
    config: String,

    /// Override the service endpoint.
    #[arg(long)]
    endpoint: Option<String>,

    /// Override the model document path.
    #[arg(short, long)]
    model: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)?;
    if let Some(endpoint) = cli.endpoint {
        settings.service.endpoint = endpoint;
    }
    if let Some(model) = cli.model {
        settings.provision.model_path = model;
    }

    let client = connect(&settings).await?;
    let mut console = Console::stdout();
    console.line("ADT service client created - ready to go!");
    console.blank();

    let document = ModelDocument::load(&settings.provision.model_path)?;
    let mut provisioner = Provisioner::new(&client, console, settings.provision);
    let summary = provisioner.run(&document).await;
    tracing::info!(?summary, "Provisioning finished");

    Ok(())
}
