use std::path::PathBuf;
use std::sync::Arc;

use amai::controller::{ChatController, ControllerOptions, connect_backend};
use amai::error::AppResult;
use amai::repl::Repl;
use amai::settings::{SettingsOverrides, SettingsStore};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "amai")]
#[command(about = "Terminal client for the Adaptive Marketing AI assistant")]
#[command(version)]
struct Cli {
    /// Backend base URL, e.g. http://localhost:8001
    #[arg(long)]
    host: Option<String>,

    /// Settings file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// History fetches made while waiting for channel messages
    #[arg(long)]
    poll_attempts: Option<u32>,

    /// Delay before each of those fetches, in milliseconds
    #[arg(long)]
    poll_delay_ms: Option<u64>,

    /// Directory for downloaded channel messages
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Drop a failed exchange instead of keeping it on screen
    #[arg(long)]
    discard_failed: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "AMAI_LOG", default_value = "warn")]
    log_filter: String,
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            backend_host: self.host.clone(),
            poll_attempts: self.poll_attempts,
            poll_delay_ms: self.poll_delay_ms,
            retain_error_on_empty_response: self.discard_failed.then_some(false),
            download_dir: self.download_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout belongs to the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_filter.as_str())),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(cli).await {
        tracing::error!(error = %error, "amai exited with an error");
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let overrides = cli.overrides();
    let store = match cli.config {
        Some(path) => SettingsStore::new(path, &overrides),
        None => SettingsStore::load(&overrides),
    };
    let settings = store.settings();
    tracing::info!(
        host = %settings.backend_host,
        config = %store.config_path().display(),
        "starting chat client"
    );

    let backend = connect_backend(&settings.backend_host)?;
    let controller = ChatController::new(
        Arc::new(backend),
        ControllerOptions {
            retention: settings.retention_policy(),
            poll: settings.poll_config(),
            download_dir: settings.download_dir.clone(),
        },
    );

    Repl::new(controller, Arc::new(store)).run().await
}
