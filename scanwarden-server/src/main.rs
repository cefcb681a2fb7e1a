//! # scanwarden
//!
//! Runs the scan orchestrator with an in-memory backend and a provider that
//! reports the subdirectories of the configured roots as assets. Every
//! control loop keeps running until Ctrl-C, then shuts down within the
//! configured grace period.

mod local;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanwarden_config::{ScanConfigSettings, Settings, SettingsSource};
use scanwarden_core::{BackendClient, InMemoryBackend, OrchestratorBuilder};

use crate::local::LocalDirProvider;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "scanwarden")]
#[command(about = "Reconciles scans, asset scans and estimations against local directories")]
struct Cli {
    /// Settings file (TOML or JSON). Overrides the default search.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discovery roots (overrides config). Repeat or comma-separate.
    #[arg(long = "root", env = "SCANWARDEN_ROOTS", value_delimiter = ',')]
    roots: Vec<PathBuf>,

    /// Name the provider registers under (overrides config)
    #[arg(long, env = "SCANWARDEN_PROVIDER_NAME")]
    provider_name: Option<String>,

    /// Do not run asset discovery in this instance
    #[arg(long, default_value_t = false)]
    no_discovery: bool,

    /// Validate the settings and exit
    #[arg(long, default_value_t = false)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Per-cycle chatter stays at debug. Override via RUST_LOG.
                "info,scan::queue=info,scan::poller=info,scan::discovery=info,scan::runtime=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (mut settings, source) = match &cli.config {
        Some(path) => (
            Settings::load_from_file(path)?,
            SettingsSource::File(path.clone()),
        ),
        None => Settings::load_from_env()?,
    };
    match &source {
        SettingsSource::Default => info!("No settings found; using defaults"),
        SettingsSource::EnvInline => info!("Loaded settings from SCANWARDEN_CONFIG_JSON"),
        SettingsSource::EnvPath(path) | SettingsSource::File(path) => {
            info!(path = %path.display(), "Loaded settings")
        }
    }

    if !cli.roots.is_empty() {
        settings.provider.local.roots = cli.roots;
    }
    if let Some(name) = cli.provider_name {
        settings.provider.display_name = Some(name);
    }
    if cli.no_discovery {
        settings.orchestrator.discovery.enabled = false;
    }

    let warnings = settings.validate().context("invalid settings")?;
    if cli.check {
        info!(warnings = warnings.items.len(), "Settings are valid");
        return Ok(());
    }

    run(settings).await
}

/// Creates the configured scan configs so the scan config watcher picks
/// them up on its first poll.
async fn seed_scan_configs<B: BackendClient>(
    backend: &B,
    configs: &[ScanConfigSettings],
) -> anyhow::Result<()> {
    for config in configs {
        let created = backend
            .post(config.to_scan_config())
            .await
            .with_context(|| format!("failed to create scan config {:?}", config.name))?;
        info!(scan_config_id = %created.id, name = %created.name, "Scan config created");
    }
    Ok(())
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryBackend::new());
    seed_scan_configs(backend.as_ref(), &settings.scan_configs).await?;
    let provider = Arc::new(LocalDirProvider::new(&settings.provider.local));

    let mut builder = OrchestratorBuilder::new(settings.orchestrator)
        .with_backend(Arc::clone(&backend))
        .with_provider(provider);
    if let Some(name) = settings.provider.display_name {
        builder = builder.with_display_name(name);
    }
    let orchestrator = builder.build()?;

    orchestrator
        .start()
        .await
        .context("failed to start orchestrator")?;
    info!(
        roots = ?settings.provider.local.roots,
        "scanwarden running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!(
        active_jobs = orchestrator.provider().active_jobs(),
        "Shutdown signal received"
    );

    if let Err(err) = orchestrator.shutdown().await {
        warn!(error = %err, "orchestrator did not shut down cleanly");
        return Err(err.into());
    }
    Ok(())
}
