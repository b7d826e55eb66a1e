use std::path::PathBuf;

use burn::config::Config;
use clap::Parser;
use thiserror::Error;

use crate::{classifier::DEFAULT_TOP_K, model::imagenet::CLASSES};

/// HTTP server settings.
#[derive(Config, Debug)]
pub struct ServerConfig {
    /// Interface to bind.
    #[config(default = "String::from(\"0.0.0.0\")")]
    pub host: String,

    #[config(default = 10000)]
    pub port: u16,

    /// Number of predictions returned per image.
    #[config(default = "DEFAULT_TOP_K")]
    pub top_k: usize,

    /// Maximum accepted request body, in bytes.
    #[config(default = "16 * 1024 * 1024")]
    pub body_limit: usize,
}

#[derive(Error, Debug)]
pub enum ServerConfigError {
    #[error("Could not load config file {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Invalid PORT environment variable {0:?}")]
    Port(String),

    #[error("top_k must be between 1 and {max}, got {got}")]
    TopK { got: usize, max: usize },
}

/// Command line flags. Each one overrides the config file and `PORT`.
#[derive(Parser, Debug, Default)]
#[command(version, about = "Classify uploaded images with MobileNetV2 over HTTP")]
pub struct Args {
    /// JSON file with server settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Number of predictions returned per image
    #[arg(long)]
    pub top_k: Option<usize>,
}

impl ServerConfig {
    /// Layer defaults, the optional config file, the `PORT` value and CLI flags, in that order.
    pub fn resolve(args: &Args, env_port: Option<&str>) -> Result<Self, ServerConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path).map_err(|err| ServerConfigError::Load {
                path: path.clone(),
                reason: err.to_string(),
            })?,
            None => Self::new(),
        };

        if let Some(port) = env_port {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ServerConfigError::Port(port.to_string()))?;
        }
        if let Some(host) = &args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(top_k) = args.top_k {
            config.top_k = top_k;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.top_k == 0 || self.top_k > CLASSES.len() {
            return Err(ServerConfigError::TopK {
                got: self.top_k,
                max: CLASSES.len(),
            });
        }
        Ok(())
    }
}
