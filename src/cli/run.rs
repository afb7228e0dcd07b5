//! The acquisition daemon: wires the bus, broadcast server, acquisition
//! subscription and configuration watcher together and runs until ctrl-c.

use crate::acquisition::Acquisition;
use crate::broadcast;
use crate::bus::Bus;
use crate::config::{self, watcher, ConfigError, Settings};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid broadcast listen address {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

pub async fn run(settings_arg: Option<PathBuf>) -> Result<(), RunError> {
    let settings_path = config::resolve_settings_path(settings_arg.as_deref());
    let settings = match &settings_path {
        Some(path) => {
            info!(path = %path.display(), "loading settings");
            config::load_settings(path)?
        }
        None => {
            warn!("no settings file found, using defaults");
            Settings::default()
        }
    };

    run_daemon(settings_path, settings).await
}

async fn run_daemon(
    settings_path: Option<PathBuf>,
    mut settings: Settings,
) -> Result<(), RunError> {
    let listen: SocketAddr = settings
        .broadcast_listen
        .parse()
        .map_err(|e| RunError::Listen {
            addr: settings.broadcast_listen.clone(),
            source: e,
        })?;

    let bus = Bus::new();
    let (inventory_tx, inventory_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = broadcast::spawn_server(listen, bus.clone(), inventory_rx, shutdown_rx.clone());

    // second, independent health consumer: the service log
    let mut health_rx = bus.subscribe_health();
    tokio::spawn(async move {
        loop {
            match health_rx.recv().await {
                Ok(health) => info!(health = %health, "acquisition health"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut acquisition = Acquisition::new(bus.clone());
    apply_configuration(&mut acquisition, &inventory_tx, &settings).await;

    let (event_tx, mut events) = mpsc::channel(16);
    let mut file_watcher = spawn_config_watcher(
        &settings_path,
        &settings,
        event_tx.clone(),
        shutdown_rx.clone(),
    );

    info!("service running, press ctrl+c to shut down");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            maybe_event = events.recv() => match maybe_event {
                Some(path) if settings_path.as_deref() == Some(path.as_path()) => {
                    match config::load_settings(&path) {
                        Ok(new_settings) => {
                            if new_settings == settings {
                                continue;
                            }
                            info!("settings changed, reloading");
                            if new_settings.broadcast_listen != settings.broadcast_listen {
                                warn!("broadcast listen address changes require a restart");
                            }
                            settings = new_settings;
                            file_watcher.abort();
                            file_watcher = spawn_config_watcher(
                                &settings_path,
                                &settings,
                                event_tx.clone(),
                                shutdown_rx.clone(),
                            );
                            apply_configuration(&mut acquisition, &inventory_tx, &settings).await;
                        }
                        Err(e) => error!(error = %e, "error reloading settings"),
                    }
                }
                Some(_) => {
                    apply_configuration(&mut acquisition, &inventory_tx, &settings).await;
                }
                None => break,
            }
        }
    }

    let _ = shutdown_tx.send(true);
    acquisition.shutdown().await;
    file_watcher.abort();
    let _ = server.await;
    info!("service shutdown complete");

    Ok(())
}

/// Load the tables named by `settings` and install them. Load failures leave
/// the previously active configuration running.
async fn apply_configuration(
    acquisition: &mut Acquisition,
    inventory_tx: &mpsc::Sender<Vec<String>>,
    settings: &Settings,
) {
    match config::load_configuration(settings) {
        Ok(configuration) => {
            let _ = inventory_tx.send(configuration.field_keys()).await;
            acquisition.load(&configuration).await;
        }
        Err(e) => error!(error = %e, "error loading configuration, keeping previous"),
    }
}

fn spawn_config_watcher(
    settings_path: &Option<PathBuf>,
    settings: &Settings,
    events: mpsc::Sender<PathBuf>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut paths = vec![
        settings.fields_path.clone(),
        settings.connections_path.clone(),
    ];
    if let Some(path) = settings_path {
        paths.push(path.clone());
    }
    watcher::spawn_watcher(paths, events, shutdown)
}
