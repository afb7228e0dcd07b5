//! The single active set of connection groups, swapped wholesale on reload.

use crate::acquisition::group::GroupWorker;
use crate::bus::Bus;
use crate::config::Configuration;
use crate::health;
use crate::reading::ReadingBatch;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Capacity of the merged batch channel feeding the health engine.
const MERGE_CAPACITY: usize = 256;

/// Owns the group workers and health engine derived from the current
/// configuration. Loading a new configuration wires the replacement set
/// before the previous one is torn down, so health coverage never gaps
/// while the service is configured.
pub struct Acquisition {
    bus: Bus,
    active: Option<ActiveSet>,
}

struct ActiveSet {
    groups: Vec<GroupWorker>,
    health: JoinHandle<()>,
}

impl Acquisition {
    pub fn new(bus: Bus) -> Self {
        Self { bus, active: None }
    }

    /// Install `config` as the active configuration.
    ///
    /// An empty configuration tears everything down; otherwise one worker is
    /// spawned per distinct resolved port and a fresh health engine is wired
    /// over their merged output. The outgoing set is disposed only after the
    /// replacement is running; a port held briefly by the outgoing set is
    /// absorbed by the worker's bind retry.
    pub async fn load(&mut self, config: &Configuration) {
        let groups = config.group_by_port();
        if groups.is_empty() {
            if config.is_empty() {
                self.unload().await;
            } else {
                // fields exist but none resolve to a port; treat as unload
                warn!("configuration routes no fields to any endpoint");
                self.unload().await;
            }
            return;
        }

        let (merge_tx, merge_rx) = mpsc::channel::<ReadingBatch>(MERGE_CAPACITY);
        let health = tokio::spawn(health::run_health_engine(
            merge_rx,
            self.bus.clone(),
            health::HEALTH_WINDOW,
        ));

        let workers: Vec<GroupWorker> = groups
            .into_iter()
            .map(|(port, fields)| {
                info!(port = port, fields = fields.len(), "starting connection group");
                GroupWorker::spawn(port, fields, merge_tx.clone(), self.bus.clone())
            })
            .collect();
        // the workers hold the only senders now; the health engine ends when
        // the last worker is shut down
        drop(merge_tx);

        let previous = self.active.replace(ActiveSet {
            groups: workers,
            health,
        });
        if let Some(previous) = previous {
            previous.dispose().await;
        }
    }

    /// Tear down to the inert state: no sockets open, no health emitted.
    pub async fn unload(&mut self) {
        if let Some(previous) = self.active.take() {
            info!("unloading active configuration");
            previous.dispose().await;
        }
    }

    /// Ports with a live group worker, in ascending order.
    pub fn active_ports(&self) -> Vec<u16> {
        self.active
            .as_ref()
            .map(|set| set.groups.iter().map(|g| g.port()).collect())
            .unwrap_or_default()
    }

    pub async fn shutdown(mut self) {
        self.unload().await;
    }
}

impl ActiveSet {
    async fn dispose(self) {
        join_all(self.groups.into_iter().map(|g| g.shutdown())).await;
        // all merged senders are gone; the engine drains and exits
        let _ = self.health.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldType;
    use crate::config::{ConnectionEndpoint, FieldSpec};

    fn config_on_port(port: u16) -> Configuration {
        Configuration {
            fields: vec![FieldSpec {
                connection: "test".to_string(),
                msg_name: "m".to_string(),
                field_name: "f".to_string(),
                data_type: FieldType::U8,
                byte_offset: 0,
                bit_offset: 0,
                range_low: 0.0,
                range_high: 0.0,
                units: String::new(),
                description: String::new(),
            }],
            connections: vec![ConnectionEndpoint {
                name: "test".to_string(),
                port,
            }],
        }
    }

    fn unused_port() -> u16 {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_load_then_unload_leaves_no_groups() {
        let mut acquisition = Acquisition::new(Bus::new());
        let port = unused_port();

        acquisition.load(&config_on_port(port)).await;
        assert_eq!(acquisition.active_ports(), vec![port]);

        acquisition.load(&Configuration::default()).await;
        assert!(acquisition.active_ports().is_empty());
    }

    #[tokio::test]
    async fn test_reload_swaps_ports() {
        let mut acquisition = Acquisition::new(Bus::new());
        let first = unused_port();
        let second = unused_port();

        acquisition.load(&config_on_port(first)).await;
        assert_eq!(acquisition.active_ports(), vec![first]);

        acquisition.load(&config_on_port(second)).await;
        assert_eq!(acquisition.active_ports(), vec![second]);

        acquisition.shutdown().await;
    }

    #[tokio::test]
    async fn test_unresolved_fields_leave_service_inert() {
        let mut acquisition = Acquisition::new(Bus::new());
        let mut config = config_on_port(unused_port());
        config.connections.clear();

        acquisition.load(&config).await;
        assert!(acquisition.active_ports().is_empty());
    }
}
