//! Line-based TCP fan-out of the reading stream to display consumers.
//!
//! A 100 ms tick drives everything: accepting queued connections, sending the
//! field-key inventory when it changes, draining the pending readings queue
//! into one framed message for every client, and answering inbound bytes with
//! the `Pong` keep-alive. Clients are dropped on any read or write failure;
//! one misbehaving consumer never affects the others.

use crate::bus::Bus;
use crate::reading::Reading;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

pub const BROADCAST_TICK: Duration = Duration::from_millis(100);

const PONG: &[u8] = b"Pong\n";

pub struct BroadcastServer {
    listener: TcpListener,
}

impl BroadcastServer {
    pub async fn bind(listen: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        info!(addr = %listener.local_addr()?, "broadcast server listening");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until shutdown. `inventory` delivers the full key set on every
    /// configuration load; reading batches are drained from the bus.
    pub async fn run(
        self,
        bus: Bus,
        mut inventory: mpsc::Receiver<Vec<String>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut readings = bus.subscribe_readings();
        let mut tick = tokio::time::interval(BROADCAST_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut clients: Vec<TcpStream> = Vec::new();
        let mut accepted: Vec<TcpStream> = Vec::new();
        let mut keys: Vec<String> = Vec::new();
        let mut keys_changed = false;
        // unbounded on purpose: producers must never block on a slow tick.
        // TODO: cap this and drop oldest once consumer sizing is settled
        let mut pending: VecDeque<Reading> = VecDeque::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "client connected");
                        accepted.push(stream);
                    }
                    Err(e) => warn!(error = %e, "error accepting client"),
                },
                result = readings.recv() => match result {
                    Ok(batch) => pending.extend(batch.readings),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "broadcast fell behind the reading stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                maybe_keys = inventory.recv() => match maybe_keys {
                    Some(new_keys) => {
                        keys = new_keys;
                        keys_changed = true;
                        pending.clear();
                    }
                    // the config loader is gone; nothing left to serve
                    None => break,
                },
                _ = tick.tick() => {
                    broadcast_tick(
                        &mut clients,
                        &mut accepted,
                        &keys,
                        &mut keys_changed,
                        &mut pending,
                    )
                    .await;
                }
            }
        }

        info!("broadcast server stopped");
    }
}

async fn broadcast_tick(
    clients: &mut Vec<TcpStream>,
    accepted: &mut Vec<TcpStream>,
    keys: &[String],
    keys_changed: &mut bool,
    pending: &mut VecDeque<Reading>,
) {
    // answer pings and weed out closed sockets before writing anything
    poll_clients(clients).await;
    poll_clients(accepted).await;

    if *keys_changed {
        clients.append(accepted);
        let frame = inventory_frame(keys);
        send_to_clients(clients, frame.as_bytes()).await;
        *keys_changed = false;
    } else {
        if !accepted.is_empty() {
            // late joiners always get the inventory at least once
            let frame = inventory_frame(keys);
            send_to_clients(accepted, frame.as_bytes()).await;
        }
        clients.append(accepted);
    }

    if !pending.is_empty() {
        let frame = readings_frame(pending.drain(..));
        send_to_clients(clients, frame.as_bytes()).await;
    }
}

/// Drain inbound bytes from every client, answering with `Pong` when any
/// were present, and drop clients whose socket is closed or failing.
async fn poll_clients(clients: &mut Vec<TcpStream>) {
    let mut index = 0;
    while index < clients.len() {
        match poll_client(&mut clients[index]).await {
            Ok(()) => index += 1,
            Err(e) => {
                debug!(error = %e, "dropping client");
                clients.swap_remove(index);
            }
        }
    }
}

async fn poll_client(client: &mut TcpStream) -> io::Result<()> {
    let mut buffer = [0u8; 1024];
    let mut inbound = false;
    loop {
        match client.try_read(&mut buffer) {
            Ok(0) => return Err(io::ErrorKind::ConnectionReset.into()),
            Ok(_) => inbound = true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    if inbound {
        client.write_all(PONG).await?;
    }
    Ok(())
}

/// Write `payload` to every client, dropping any that fail.
async fn send_to_clients(clients: &mut Vec<TcpStream>, payload: &[u8]) {
    let mut index = 0;
    while index < clients.len() {
        match clients[index].write_all(payload).await {
            Ok(()) => index += 1,
            Err(e) => {
                debug!(error = %e, "dropping client");
                clients.swap_remove(index);
            }
        }
    }
}

/// `Loading`, one line per field key, `DoneLoading`.
fn inventory_frame(keys: &[String]) -> String {
    let mut frame = String::from("Loading\n");
    for key in keys {
        frame.push_str(key);
        frame.push('\n');
    }
    frame.push_str("DoneLoading\n");
    frame
}

/// One line per reading: `key,qualityName,epochMillis,value`.
fn readings_frame(readings: impl Iterator<Item = Reading>) -> String {
    let mut frame = String::new();
    for reading in readings {
        frame.push_str(&reading.to_string());
        frame.push('\n');
    }
    frame
}

/// Spawn the server on `listen`. Errors binding the listener are logged and
/// the task ends; the rest of the pipeline keeps running without a consumer
/// feed.
pub fn spawn_server(
    listen: SocketAddr,
    bus: Bus,
    inventory: mpsc::Receiver<Vec<String>>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match BroadcastServer::bind(listen).await {
            Ok(server) => server.run(bus, inventory, shutdown).await,
            Err(e) => error!(addr = %listen, error = %e, "error starting broadcast server"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Quality;
    use chrono::TimeZone;
    use chrono::Utc;

    #[test]
    fn test_inventory_frame_layout() {
        let keys = vec!["pos:altitude".to_string(), "pos:speed".to_string()];
        assert_eq!(
            inventory_frame(&keys),
            "Loading\npos:altitude\npos:speed\nDoneLoading\n"
        );
    }

    #[test]
    fn test_empty_inventory_frame_has_no_blank_line() {
        assert_eq!(inventory_frame(&[]), "Loading\nDoneLoading\n");
    }

    #[test]
    fn test_readings_frame_layout() {
        let time = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let millis = time.timestamp_millis();
        let readings = vec![
            Reading::new("pos:altitude", time, 800.5, Quality::Good),
            Reading::new("pos:speed", time, f64::NAN, Quality::Bad),
        ];
        assert_eq!(
            readings_frame(readings.into_iter()),
            format!(
                "pos:altitude,GOOD,{millis},800.5\npos:speed,BAD,{millis},NaN\n"
            )
        );
    }
}
