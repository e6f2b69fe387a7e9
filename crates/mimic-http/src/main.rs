use anyhow::Context;
use clap::Parser;
use mimic_http::{Config, MockServer};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mimic-http")]
#[command(author, version, about = "HTTP(S) service virtualization server")]
struct Args {
    /// Configuration file (.json, or YAML otherwise)
    #[arg(short, long, env = "MIMIC_CONFIG")]
    config: Option<PathBuf>,

    /// Plain HTTP / proxy port
    #[arg(short, long, env = "MIMIC_PORT")]
    port: Option<u16>,

    /// Internal MITM listener port (0 picks a free port)
    #[arg(long, env = "MIMIC_MITM_PORT")]
    mitm_port: Option<u16>,

    /// Bind address
    #[arg(long, env = "MIMIC_BIND")]
    bind: Option<String>,

    /// Forward unmatched browser-proxied requests to their destination
    #[arg(long)]
    browser_proxying: bool,

    /// Keep at most this many journal entries
    #[arg(long)]
    max_journal_entries: Option<usize>,

    /// Write the CA certificate PEM to this path once started
    #[arg(long)]
    export_ca: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<Config, anyhow::Error> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(port) = self.mitm_port {
            config.listen.mitm_port = port;
        }
        if let Some(bind) = self.bind {
            config.listen.bind = bind;
        }
        if self.browser_proxying {
            config.proxy.browser_proxying = true;
        }
        if let Some(max) = self.max_journal_entries {
            config.journal.max_entries = Some(max);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let export_ca = args.export_ca.clone();
    let config = args.into_config()?;
    let server = MockServer::start(config).await?;

    if let (Some(path), Some(pem)) = (export_ca, server.ca_cert_pem()) {
        std::fs::write(&path, pem)
            .with_context(|| format!("Failed to write CA certificate to {}", path.display()))?;
        info!("Wrote CA certificate to {}", path.display());
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down");
    server.stop().await;
    Ok(())
}
