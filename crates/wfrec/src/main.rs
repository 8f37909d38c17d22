use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use wfrec_engine::backend::Backend;
use wfrec_engine::cli::{self, FileOptions, OutputHandlers, ReplOptions};
use wfrec_engine::config::{ConfigLoader, RecorderConfig};
use wfrec_engine::coordinator::Coordinator;
use wfrec_engine::export::{DirectoryDownloader, Exporter};
use wfrec_engine::journal::Journal;
use wfrec_engine::store::{JsonFileStore, StateStore};
use wfrec_h::backend::{HeadlessBackend, HostChannels};
use wfrec_h::cdp::LaunchOptions;

#[derive(Parser)]
#[command(name = "wfrec", version, about = "Record browser workflows to JSON")]
struct Args {
    /// Configuration file (defaults to $WFREC_CONFIG, ./wfrec.yaml, then ~/.wfrec/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Commands to execute (non-interactive mode)
    #[arg(long)]
    file: Option<String>,

    /// Run the browser without a window
    #[arg(long)]
    headless: bool,

    /// Page to open after launch
    #[arg(long)]
    url: Option<String>,
}

async fn load_config(args: &Args) -> anyhow::Result<RecorderConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    if args.headless {
        config.browser.visible = false;
    }
    if args.url.is_some() {
        config.browser.start_url = args.url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries command output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args).await?;

    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(&config.store.path));
    tracing::info!(path = %config.store.path.display(), "Using state store");

    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (navigations_tx, navigations_rx) = mpsc::unbounded_channel();
    let channels = HostChannels {
        requests: requests_tx,
        navigations: navigations_tx,
        store_changes: store.subscribe(),
    };
    let launch = LaunchOptions {
        visible: config.browser.visible,
        chrome_bin: config.browser.chrome_bin.clone(),
    };
    let backend = Arc::new(
        HeadlessBackend::launch(&launch, channels)
            .await
            .context("Failed to launch backend")?,
    );
    if let Some(url) = &config.browser.start_url {
        backend.navigate(url).await?;
    }

    let exporter = Exporter::new(
        Box::new(DirectoryDownloader::new(&config.export.directory)),
        config.export.filename_prefix.clone(),
        config.export.timestamp_suffix,
    );
    let coordinator = Arc::new(Coordinator::new(
        backend.clone(),
        Journal::spawn(store),
        exporter,
        config.recording.operation_timeout(),
    ));
    let server = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.serve(requests_rx, navigations_rx).await })
    };

    let output = OutputHandlers {
        out: |msg| println!("{}", msg),
        err: |msg| eprintln!("{}", msg),
    };

    let result = if let Some(file_path) = &args.file {
        cli::run_file(
            &coordinator,
            output,
            file_path,
            FileOptions {
                stop_on_error: true,
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("Error executing file {}: {}", file_path, e))
    } else {
        let repl_options = ReplOptions {
            banner_lines: &[
                "Browser launched. Commands: start, stop, snapshot, status, mutations on|off, goto <url>.",
                "Type 'exit' or 'quit' to close.",
            ],
            prompt: "> ",
            exit_commands: &["exit", "quit"],
            ctrl_c_message: Some("Interrupted."),
        };
        cli::run_repl(&coordinator, output, repl_options)
            .await
            .map_err(|e| anyhow::anyhow!("Error during session: {}", e))
    };

    server.abort();
    drop(coordinator);
    let _ = server.await;
    match Arc::try_unwrap(backend) {
        Ok(backend) => backend.close().await?,
        Err(_) => tracing::warn!("Backend still in use; skipping browser shutdown"),
    }
    result
}
