//! Speech-to-text gateway entry point

use std::sync::Arc;

use clap::Parser;
use stt_gateway::{Config, ConnectionAcceptor, EngineAdapter, WhisperEngine};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    config.validate().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;

    info!(bind_addr = %config.bind_addr, upgrade_path = %config.upgrade_path, max_concurrent = config.max_concurrent, "starting stt-gateway");

    let engine = Arc::new(WhisperEngine::new(config.model_path.clone().map(Into::into)));
    stt_gateway::SpeechToText::initialize(engine.as_ref()).await?;

    let limiter = stt_gateway::ConcurrencyLimiter::new(config.max_concurrent);
    let adapter = Arc::new(EngineAdapter::new(engine, limiter));

    let acceptor =
        ConnectionAcceptor::bind(&config.bind_addr, config.upgrade_path.clone(), adapter).await?;

    let shutdown = CancellationToken::new();
    let ctrl_c_cancel = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        ctrl_c_cancel.cancel();
    });

    acceptor.serve(shutdown).await?;
    Ok(())
}
