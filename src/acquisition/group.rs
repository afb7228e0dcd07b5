//! Per-endpoint worker: socket lifecycle, 1 Hz sampling and decode.

use crate::acquisition::socket::{Datagram, DatagramSource, UdpEndpoint};
use crate::bus::Bus;
use crate::codec;
use crate::config::FieldSpec;
use crate::reading::{Quality, Reading, ReadingBatch};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Endpoint open/read failures back off this long before retrying, forever.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// At most one datagram per group is decoded per interval; the most recently
/// arrived one wins, the rest are discarded.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// One running connection group: every field routed to one resolved port,
/// decoding through a single shared socket.
pub struct GroupWorker {
    port: u16,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl GroupWorker {
    /// Spawn the worker. Each decoded batch is delivered to `health_tx` (the
    /// merged health stream) and published on the bus for downstream sinks.
    pub fn spawn(
        port: u16,
        fields: Vec<FieldSpec>,
        health_tx: mpsc::Sender<ReadingBatch>,
        bus: Bus,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_group(port, fields, health_tx, bus, shutdown_rx));
        Self {
            port,
            shutdown,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the worker and release its socket. Idempotent against a worker
    /// that already exited on its own.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

async fn run_group(
    port: u16,
    fields: Vec<FieldSpec>,
    health_tx: mpsc::Sender<ReadingBatch>,
    bus: Bus,
    mut shutdown: watch::Receiver<bool>,
) {
    'endpoint: loop {
        let mut endpoint = match UdpEndpoint::bind(port).await {
            Ok(endpoint) => {
                info!(port = port, "opened udp socket");
                endpoint
            }
            Err(e) => {
                error!(port = port, error = %e, "error opening udp socket");
                if wait_retry(&mut shutdown).await.is_err() {
                    return;
                }
                continue 'endpoint;
            }
        };

        let mut sample = tokio::time::interval(SAMPLE_INTERVAL);
        sample.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut latest: Option<Datagram> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(port = port, "closing udp socket");
                    return;
                }
                result = endpoint.recv() => match result {
                    Ok(datagram) => latest = Some(datagram),
                    Err(e) => {
                        error!(port = port, error = %e, "error reading udp data");
                        drop(endpoint);
                        if wait_retry(&mut shutdown).await.is_err() {
                            return;
                        }
                        continue 'endpoint;
                    }
                },
                _ = sample.tick() => {
                    if let Some(datagram) = latest.take() {
                        let batch = decode_datagram(&fields, &datagram.payload);
                        if health_tx.send(batch.clone()).await.is_err() {
                            debug!(port = port, "health stream closed");
                        }
                        bus.publish_readings(batch);
                    }
                }
            }
        }
    }
}

/// Sleep out the retry delay unless shutdown arrives first.
async fn wait_retry(shutdown: &mut watch::Receiver<bool>) -> Result<(), ()> {
    tokio::select! {
        _ = shutdown.changed() => Err(()),
        _ = tokio::time::sleep(RETRY_DELAY) => Ok(()),
    }
}

/// Decode one sampled datagram into a batch.
///
/// A checksum mismatch degrades the whole cycle to an empty batch; a decode
/// failure on a single field degrades only that field to NaN/BAD.
pub fn decode_datagram(fields: &[FieldSpec], payload: &[u8]) -> ReadingBatch {
    if !codec::verify_checksum(payload) {
        warn!(len = payload.len(), "bad datagram checksum");
        return ReadingBatch::empty();
    }
    let time = Utc::now();
    let readings = fields
        .iter()
        .map(|field| {
            match codec::decode_field(payload, field.byte_offset, field.bit_offset, field.data_type)
            {
                Ok(value) => Reading::new(field.key(), time, value, Quality::Good),
                Err(e) => {
                    debug!(key = %field.key(), error = %e, "field decode failed");
                    Reading::new(field.key(), time, f64::NAN, Quality::Bad)
                }
            }
        })
        .collect();
    ReadingBatch::new(readings)
}
