//! # vicinity
//!
//! Vehicle presence and proximity server binary. Loads settings, starts
//! telemetry, wires the optional collaborators and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tracing::{info, warn};
use vicinity_server::{
    start, AllowAll, Collaborators, Fanout, HubConfig, InProcessChannel, ServerConfig,
    SharedSecretVerifier, TokenVerifier,
};
use vicinity_settings::{load_settings_from_path, resolve_path, settings_path, VicinitySettings};
use vicinity_store::{SqliteStore, Store};
use vicinity_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Vehicle presence and proximity routing server.
#[derive(Parser, Debug)]
#[command(name = "vicinity", about = "Vehicle presence and proximity routing server")]
struct Cli {
    /// Settings file (defaults to ~/.vicinity/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Radio device path or `tcp://host:port` bridge. Enables the radio link.
    #[arg(long)]
    radio_device: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut VicinitySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(device) = &self.radio_device {
            settings.radio.enabled = true;
            settings.radio.device = Some(device.clone());
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn telemetry_config(settings: &VicinitySettings, base: &Path) -> TelemetryConfig {
    let t = &settings.telemetry;
    let defaults = TelemetryConfig::default();
    TelemetryConfig {
        log_level: parse_level(&t.level).unwrap_or(defaults.log_level),
        json: t.json,
        log_to_sqlite: t.log_to_sqlite,
        log_db_path: resolve_path(base, &t.log_db_path),
        ..defaults
    }
    .with_module_levels(&t.module_levels)
}

async fn collaborators(settings: &VicinitySettings, base: &Path) -> Result<Collaborators> {
    let store = if settings.store.enabled {
        let path = resolve_path(base, &settings.store.path);
        ensure_parent_dir(&path)?;
        let store = SqliteStore::open(&path)
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        info!(path = %path.display(), "store opened");
        Some(Arc::new(store) as Arc<dyn Store>)
    } else {
        None
    };

    let verifier: Arc<dyn TokenVerifier> = match settings.auth.shared_secret.as_deref() {
        Some(secret) if !secret.trim().is_empty() => {
            Arc::new(SharedSecretVerifier::new(SecretString::from(secret)))
        }
        _ => Arc::new(AllowAll),
    };

    let fanout = if settings.fanout.enabled {
        let origin = settings
            .fanout
            .origin
            .clone()
            .unwrap_or_else(|| format!("vicinity-{}", std::process::id()));
        info!(origin = %origin, "fanout enabled");
        Fanout::new(origin, Arc::new(InProcessChannel::new(settings.fanout.capacity)))
    } else {
        Fanout::local_only()
    };

    // A missing radio is not fatal: the server runs without the link.
    let radio = match (settings.radio.enabled, settings.radio.device.as_deref()) {
        (true, Some(device)) => match vicinity_radio::open(device).await {
            Ok(transport) => Some(transport),
            Err(e) => {
                warn!(device, error = %e, "radio unavailable, continuing without it");
                None
            }
        },
        _ => None,
    };

    Ok(Collaborators {
        store,
        store_queue: settings.store.queue_size,
        verifier,
        fanout,
        radio,
        radio_queue: settings.radio.queue_size,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid command-line overrides")?;
    let base = path
        .parent()
        .map_or_else(vicinity_settings::vicinity_dir, Path::to_path_buf);

    let telemetry = init_telemetry(telemetry_config(&settings, &base));
    info!(
        settings = %path.display(),
        sqlite_logs = telemetry.logs().is_some(),
        "vicinity starting"
    );

    let collaborators = collaborators(&settings, &base).await?;
    let server = start(
        ServerConfig::from(&settings),
        HubConfig::from(&settings),
        collaborators,
    )
    .await
    .context("Failed to start server")?;
    info!(addr = %server.addr(), "ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");
    server.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from(["vicinity", "--host", "0.0.0.0", "--port", "9001", "--radio-device", "tcp://127.0.0.1:7000"]);
        let mut settings = VicinitySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9001);
        assert!(settings.radio.enabled);
        assert_eq!(settings.radio.device.as_deref(), Some("tcp://127.0.0.1:7000"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn no_flags_leave_settings_alone() {
        let cli = Cli::parse_from(["vicinity"]);
        let mut settings = VicinitySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, VicinitySettings::default().server.port);
        assert!(!settings.radio.enabled);
    }

    #[test]
    fn telemetry_paths_resolve_against_base() {
        let mut settings = VicinitySettings::default();
        settings.telemetry.level = "debug".into();
        settings.telemetry.log_db_path = "logs/vicinity.db".into();
        let config = telemetry_config(&settings, Path::new("/srv/vicinity"));
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert_eq!(config.log_db_path, PathBuf::from("/srv/vicinity/logs/vicinity.db"));
    }

    #[tokio::test]
    async fn disabled_collaborators_stay_off() {
        let mut settings = VicinitySettings::default();
        settings.store.enabled = false;
        let c = collaborators(&settings, Path::new("/tmp")).await.unwrap();
        assert!(c.store.is_none());
        assert!(c.radio.is_none());
        assert!(!c.fanout.is_enabled());
    }

    #[tokio::test]
    async fn store_is_created_under_base() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = VicinitySettings::default();
        settings.store.enabled = true;
        settings.store.path = "db/vicinity.db".into();
        let c = collaborators(&settings, dir.path()).await.unwrap();
        assert!(c.store.is_some());
        assert!(dir.path().join("db/vicinity.db").exists());
    }
}
