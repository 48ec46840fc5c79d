use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use duplex_voice_rs::{Gateway, HttpKnowledgeIndex, RealtimeEngineFactory, RetrievalClient, Settings};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "duplex-voice", about = "Duplex voice gateway with knowledge lookup", version)]
struct Args {
    /// TOML settings file. Environment variables prefixed DUPLEX_VOICE__ override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding server.bind.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }
    if settings.engine.api_key.is_empty() {
        tracing::warn!("engine.api_key is empty; the speech engine will likely refuse connections");
    }

    let index = HttpKnowledgeIndex::new(
        &settings.retrieval.url,
        settings.retrieval.api_key.as_deref(),
        settings.retrieval.timeout(),
    )
    .context("building knowledge index client")?;
    let retrieval = Arc::new(RetrievalClient::new(Arc::new(index), settings.retrieval.search_options()));

    let factory = RealtimeEngineFactory::new(settings.engine.engine_config(), retrieval);
    let gateway = Gateway::new(factory, &settings.server, settings.session.settings());

    let listener = TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("binding {}", settings.server.bind))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Could not listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
        signal.cancel();
    });

    gateway.serve(listener, shutdown).await.context("serving voice gateway")?;
    Ok(())
}
