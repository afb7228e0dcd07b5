//! The UDP socket resource owned by a connection group.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Largest datagram we accept; anything longer is truncated by the OS.
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// One inbound UDP datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub source: SocketAddr,
    pub payload: Vec<u8>,
}

/// A restartable source of datagrams. The production implementation is
/// [`UdpEndpoint`]; tests substitute scripted sources.
#[async_trait]
pub trait DatagramSource: Send {
    async fn recv(&mut self) -> io::Result<Datagram>;
}

/// Wraps one bound UDP endpoint. Exactly one endpoint exists per distinct
/// port while its group worker is active; dropping it closes the socket.
pub struct UdpEndpoint {
    socket: UdpSocket,
    buffer: Vec<u8>,
}

impl UdpEndpoint {
    /// Bind `0.0.0.0:<port>`.
    pub async fn bind(port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        Ok(Self {
            socket,
            buffer: vec![0u8; RECV_BUFFER_SIZE],
        })
    }

    /// The actually-bound port, needed when binding port 0 in tests.
    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }
}

#[async_trait]
impl DatagramSource for UdpEndpoint {
    async fn recv(&mut self) -> io::Result<Datagram> {
        let (len, source) = self.socket.recv_from(&mut self.buffer).await?;
        Ok(Datagram {
            source,
            payload: self.buffer[..len].to_vec(),
        })
    }
}
