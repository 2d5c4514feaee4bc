use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lf_domain::config::{ConfigSeverity, ServerConfig};
use lf_server::api;
use lf_server::backends::{NullBackendFactory, StubBackendFactory};
use lf_server::state::AppState;
use lf_server::streaming::spawn_stream_reaper;

#[derive(Parser)]
#[command(name = "llamafarm", about = "Self-hosted AI application platform")]
struct Cli {
    /// Path to the server config file.
    #[arg(long, default_value = "llamafarm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (the default).
    Serve {
        /// Use deterministic in-process stub backends instead of a linked
        /// model runtime (development only).
        #[arg(long)]
        stub_backends: bool,
    },
    /// Validate a project manifest and exit.
    Validate {
        namespace: String,
        project: String,
    },
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(config, false).await
        }
        Some(Command::Serve { stub_backends }) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(config, stub_backends).await
        }
        Some(Command::Validate { namespace, project }) => {
            let config = load_config(&cli.config)?;
            let registry = lf_server::projects::ProjectRegistry::new(&config.data_root);
            let project_config = registry
                .get(&namespace, &project)
                .with_context(|| format!("loading project {namespace}/{project}"))?;
            let issues = project_config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("ok: {namespace}/{project}");
            Ok(())
        }
        Some(Command::Version) => {
            println!("llamafarm {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lf_server=debug")),
        )
        .json()
        .init();
}

/// Read the server config file (missing file falls back to defaults) and
/// apply the environment overrides.
fn load_config(path: &PathBuf) -> anyhow::Result<ServerConfig> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        ServerConfig::default()
    };
    config.apply_env();
    Ok(config)
}

async fn run_server(config: ServerConfig, stub_backends: bool) -> anyhow::Result<()> {
    tracing::info!("LlamaFarm starting");

    let backends: Arc<dyn lf_models::BackendFactory> = if stub_backends {
        tracing::warn!("running with stub model backends");
        Arc::new(StubBackendFactory)
    } else {
        Arc::new(NullBackendFactory)
    };

    std::fs::create_dir_all(&config.data_root)
        .with_context(|| format!("creating data root {}", config.data_root.display()))?;

    let bind = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, backends);

    // Background reapers: idle models, idle streaming sessions, and old
    // terminal task records.
    let _model_reaper = lf_models::spawn_reaper(
        state.models.clone(),
        Duration::from_secs(state.config.cleanup_check_interval_secs),
    );
    let _stream_reaper = spawn_stream_reaper(
        state.stream_sessions.clone(),
        Duration::from_secs(state.config.stream_reaper_interval_secs),
    );
    let _task_reaper = {
        let broker = state.broker.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(600));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                broker.store().evict_terminal(chrono::Duration::hours(24));
            }
        })
    };

    let router = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(addr = %bind, "listening");

    axum::serve(listener, router)
        .await
        .context("server terminated")?;
    Ok(())
}
