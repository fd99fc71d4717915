use anyhow::Context;
use clap::Parser;
use llm_gateway::config::{ConfigSource, CONFIG_PATH_ENV};
use llm_gateway::{logging, server, Gateway};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "llm-gateway", version, about = "OpenAI-compatible LLM gateway")]
struct Cli {
    /// Configuration files, merged in order (later files win)
    #[arg(short, long = "config", env = CONFIG_PATH_ENV, value_delimiter = ',')]
    config: Vec<PathBuf>,

    /// Overrides `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Overrides `server.port`
    #[arg(long)]
    port: Option<u16>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let gateway = if cli.config.is_empty() {
        Gateway::new()
    } else {
        Gateway::from_source(ConfigSource::Paths(cli.config.clone()))
    }
    .context("failed to load gateway configuration")?;
    let gateway = Arc::new(gateway);

    let settings = gateway.server_settings();
    let addr = format!(
        "{}:{}",
        cli.host.as_deref().unwrap_or(&settings.host),
        cli.port.unwrap_or(settings.port)
    );

    #[cfg(unix)]
    spawn_reload_on_hangup(Arc::clone(&gateway))?;

    server::serve(Arc::clone(&gateway), &addr, shutdown_signal())
        .await
        .with_context(|| format!("server on {} failed", addr))?;

    info!("shut down");
    Ok(())
}

/// SIGHUP rereads the configuration the gateway was started with.
#[cfg(unix)]
fn spawn_reload_on_hangup(gateway: Arc<Gateway>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            let gateway = Arc::clone(&gateway);
            match tokio::task::spawn_blocking(move || gateway.reload(None)).await {
                Ok(Ok(summary)) => info!(generation = summary.generation, "reloaded on SIGHUP"),
                Ok(Err(err)) => warn!(error = %err, "SIGHUP reload rejected"),
                Err(err) => warn!(error = %err, "SIGHUP reload task failed"),
            }
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
