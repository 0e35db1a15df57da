//! HTTP ingestion service for cadenza.
//!
//! Accepts metric payloads over HTTP, folds each one into a shared
//! in-memory block, and answers series lookups against it.

mod api;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use cadenza::Block;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::IngestorConfig;

/// cadenza-ingestor — HTTP ingestion service backed by an in-memory block.
#[derive(Parser)]
#[command(name = "cadenza-ingestor", version, about)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the HTTP API (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind (overrides the config file).
    #[arg(long)]
    bind: Option<String>,

    /// Largest accepted request body in bytes (overrides the config file).
    #[arg(long)]
    max_body_bytes: Option<usize>,

    /// Most connections served at once (overrides the config file).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Log filter used when `RUST_LOG` is unset (overrides the config file).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file, if any, and applies command-line overrides.
    fn into_config(self) -> Result<IngestorConfig, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => IngestorConfig::load(path)?,
            None => IngestorConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(max_body_bytes) = self.max_body_bytes {
            config.max_body_bytes = max_body_bytes;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(config) {
        tracing::error!("ingestor failed: {e}");
        std::process::exit(1);
    }
}

fn run(config: IngestorConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        max_body_bytes = config.max_body_bytes,
        max_connections = config.max_connections,
        read_timeout_secs = config.read_timeout_secs,
        "starting cadenza-ingestor"
    );

    let block = Arc::new(Block::new());
    api::run_api_server(block, Arc::new(config))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingestor.json");
        std::fs::write(&path, r#"{"port": 9200, "bind": "127.0.0.1", "log_level": "debug"}"#)
            .unwrap();

        let cli = Cli::parse_from([
            "cadenza-ingestor",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9300",
            "--max-body-bytes",
            "1024",
            "--max-connections",
            "8",
        ]);
        let config = cli.into_config().unwrap();

        assert_eq!(config.port, 9300);
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_overrides_are_validated() {
        let cli = Cli::parse_from(["cadenza-ingestor", "--port", "0"]);
        assert!(matches!(
            cli.into_config(),
            Err(config::ConfigError::Invalid { .. })
        ));
    }
}
