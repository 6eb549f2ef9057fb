//! StatusBroadcaster: multicast announcements to every listener.
//!
//! Listeners (status panels, dialers waiting for their link) never poll; they
//! join the multicast group and read:
//!
//! - `BROADCAST INIT` once at startup, meaning "forget what you knew",
//! - `BROADCAST STATUS ...` every poll tick with one line per device,
//! - `BROADCAST QUIT` once on shutdown.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use link_core::{encode_broadcast, Broadcast};
use tracing::{debug, info};

use super::error::BrokerError;
use super::registry::Registry;

/// Outbound half of the datagram transport.
///
/// The UDP socket implements this in production; tests substitute a mock or a
/// recorder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Sends one datagram to `target`, returning the number of bytes sent.
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<usize>;
}

/// Sends announcements to the configured multicast group.
pub struct StatusBroadcaster {
    sink: Arc<dyn DatagramSink>,
    group: SocketAddr,
}

impl StatusBroadcaster {
    pub fn new(sink: Arc<dyn DatagramSink>, group: SocketAddr) -> Self {
        Self { sink, group }
    }

    /// Sends `BROADCAST INIT`.
    pub async fn announce_init(&self) -> Result<(), BrokerError> {
        info!("announcing startup to {}", self.group);
        self.send(&Broadcast::Init).await
    }

    /// Sends `BROADCAST QUIT`.
    pub async fn announce_quit(&self) -> Result<(), BrokerError> {
        info!("announcing shutdown to {}", self.group);
        self.send(&Broadcast::Quit).await
    }

    /// Sends one `BROADCAST STATUS` datagram covering every device.
    pub async fn broadcast_status(
        &self,
        registry: &Registry,
        now: Instant,
    ) -> Result<(), BrokerError> {
        let lines = registry.devices().map(|d| d.status_line(now)).collect();
        self.send(&Broadcast::Status(lines)).await
    }

    async fn send(&self, message: &Broadcast) -> Result<(), BrokerError> {
        let payload = encode_broadcast(message);
        let sent = self.sink.send_to(payload.as_bytes(), self.group).await?;
        debug!("broadcast {sent} bytes to {}", self.group);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
