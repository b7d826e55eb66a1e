use anyhow::{anyhow, Context};
use burn::backend::NdArray;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mobilenetv2_classifier::{
    config::{Args, ServerConfig},
    server, ImageClassifier,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    if let Err(err) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        tracing::warn!("Logger already initialized: {err}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let env_port = std::env::var("PORT").ok();
    let config = ServerConfig::resolve(&args, env_port.as_deref())?;

    tracing::info!("Loading MobileNetV2 model...");
    // Weights download and decoding block, keep them off the async workers
    let classifier = tokio::task::spawn_blocking(|| {
        let device = Default::default();
        ImageClassifier::<NdArray>::pretrained(&device)
    })
    .await
    .context("Model loading task failed")?
    .map_err(|err| anyhow!("Failed to load pre-trained weights.\nError: {err}"))?
    .with_top_k(config.top_k);
    tracing::info!("Model loaded successfully");

    server::serve(&config, classifier)
        .await
        .with_context(|| format!("Server on {}:{} failed", config.host, config.port))
}
