//! UDP transport: one socket for commands, replies and broadcasts.
//!
//! The server binds a single UDP socket on the listen port.  Clients and peers
//! send commands to it, replies go back out of it to the sender's address, and
//! `BROADCAST` datagrams leave from it towards the multicast group.  Nothing
//! joins the group on the server side; it only ever sends there.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::application::status_broadcast::DatagramSink;

/// Error type for transport setup.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The UDP socket could not be bound.
    #[error("failed to bind command socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// The server's UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds the command socket on `addr`.
    ///
    /// `multicast_ttl` is applied to outgoing IPv4 multicast datagrams; failing
    /// to set it is logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the socket cannot be bound.
    pub async fn bind(addr: SocketAddr, multicast_ttl: u32) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed { addr, source })?;

        if addr.is_ipv4() {
            if let Err(e) = socket.set_multicast_ttl_v4(multicast_ttl) {
                warn!("could not set multicast TTL to {multicast_ttl}: {e}");
            }
        }

        let transport = Self { socket };
        if let Ok(local) = transport.local_addr() {
            info!("listening for commands on UDP {local}");
        }
        Ok(transport)
    }

    /// The address the socket is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for the next datagram.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}

#[async_trait]
impl DatagramSink for UdpTransport {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(payload, target).await
    }
}

/// Returns `true` for receive errors that only concern one earlier datagram
/// and must not stop the server.
///
/// On Linux an ICMP "port unreachable" for a reply we sent surfaces as
/// `ConnectionRefused` on the next receive.
pub fn is_transient_recv_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
    )
}
