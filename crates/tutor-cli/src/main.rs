//! Tutor Loop CLI
//!
//! Loads configuration, probes the model endpoint and serves the tutoring
//! HTTP API until Ctrl+C.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tutor_engine::{
    create_router, AppState, Config, InMemoryPersistence, JsonFilePersistence, OllamaClient,
    Persistence,
};

/// Tutor Loop - adaptive tutoring server
///
/// Teaches an ordered list of topics with a local language model. Learners
/// advance only after summarizing what they understood, and each request
/// carries earlier topics' summaries instead of their full transcripts.
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Port for the HTTP API server (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON file to keep sessions in (default: in memory only)
    #[arg(long, value_name = "FILE")]
    state_file: Option<String>,

    /// Base URL of the Ollama-compatible model endpoint
    #[arg(long, value_name = "URL")]
    model_url: Option<String>,

    /// Model name to request
    #[arg(short, long)]
    model: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Tutor Loop starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_server(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Builds the engine and serves the API until shutdown.
async fn run_server(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(state_file) = args.state_file {
        config.state_file = Some(state_file);
    }
    if let Some(model_url) = args.model_url {
        config.model.base_url = model_url;
    }
    if let Some(model) = args.model {
        config.model.model = model;
    }

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    let persistence = open_persistence(&config).await?;
    let client = OllamaClient::new(&config.model)?;

    println!();
    println!("Checking model endpoint...");
    let state = AppState::new(config.clone(), persistence, Arc::new(client));
    if state.controller.health().await {
        println!("Model endpoint is reachable");
    } else {
        tracing::warn!(base_url = %config.model.base_url, "Model endpoint is not reachable");
        println!(
            "Model endpoint is not reachable at {}\n\nSuggestion: Start Ollama and pull '{}'; the server keeps running and /api/tutor/health reports the state",
            config.model.base_url, config.model.model
        );
    }

    let addr: SocketAddr = ([127, 0, 0, 1], config.port).into();
    let router = create_router(state);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}/api/tutor");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!();
    println!("Tutor Loop stopped");
    Ok(())
}

/// Loads configuration from a file or the current directory.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Opens the JSON state file when one is configured, otherwise keeps
/// sessions in memory.
async fn open_persistence(config: &Config) -> anyhow::Result<Arc<dyn Persistence>> {
    match &config.state_file {
        Some(path) => {
            let store = JsonFilePersistence::open(path).await.map_err(|e| {
                anyhow::anyhow!(
                    "Failed to open state file: {e}\n\nSuggestion: Move the file away to start with an empty state"
                )
            })?;
            tracing::info!(path = %path, "Sessions persisted to state file");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("Sessions kept in memory");
            Ok(Arc::new(InMemoryPersistence::new()))
        }
    }
}

/// Resolves when Ctrl+C is pressed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Prints the effective configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Subject: {}", config.subject);
    println!("  Response language: {}", config.response_language);
    println!("  Model: {} at {}", config.model.model, config.model.base_url);
    println!(
        "  Filter: keep {}, strip {} (retry above {:.0}%)",
        config.filter.expected_script,
        config.filter.unwanted_script,
        config.filter.retry_threshold * 100.0
    );
    println!("  Max retries: {}", config.retry.max_retries);
    println!("  Context strategy: {:?}", config.context.strategy);
    println!(
        "  State file: {}",
        config.state_file.as_deref().unwrap_or("(in memory)")
    );
}
