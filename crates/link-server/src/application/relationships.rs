//! RelationshipGraph: creates and removes client ↔ device edges.
//!
//! An edge means "this client wants this link up".  The first edge on a device
//! starts the link and removing the last one shuts it down, so the graph asks
//! the [`LinkStateMachine`] for the matching transition *before* mutating the
//! registry.  When the transition fails the edge is left exactly as it was and
//! the error is returned, so the caller (or the next sweep) can try again.

use std::net::SocketAddr;
use std::time::Instant;

use link_core::LinkStatus;
use tracing::debug;

use super::error::BrokerError;
use super::link_state::LinkStateMachine;
use super::registry::Registry;

/// Edge bookkeeping on top of the link state machine.
pub struct RelationshipGraph {
    machine: LinkStateMachine,
}

impl RelationshipGraph {
    pub fn new(machine: LinkStateMachine) -> Self {
        Self { machine }
    }

    /// The state machine used for first/last-edge transitions.
    pub fn machine(&self) -> &LinkStateMachine {
        &self.machine
    }

    /// Records that `client` uses `device`, starting the link if nobody used it.
    ///
    /// Connecting an already-connected pair is a no-op.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NotFound`] for an unknown client or device, or whatever
    /// the CONNECTING transition returned.  The edge is not created on error.
    pub async fn connect(
        &self,
        registry: &mut Registry,
        client: SocketAddr,
        device: &str,
        now: Instant,
    ) -> Result<(), BrokerError> {
        registry.find_client(client)?;
        let first = registry.find_device(device)?.client_count() == 0;

        if registry.is_linked(client, device) {
            debug!("client {client} already uses {device}");
            return Ok(());
        }

        if first {
            self.machine
                .transition(registry, device, LinkStatus::Connecting, now)
                .await?;
        }

        registry.link(client, device)?;
        debug!("client {client} now uses {device}");
        Ok(())
    }

    /// Removes the edge between `client` and `device`, shutting the link down
    /// when it was the last one on an active device.
    ///
    /// Disconnecting a pair without an edge is a no-op.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NotFound`] for an unknown client or device, or whatever
    /// the DISCONNECTING transition returned.  The edge is kept on error.
    pub async fn disconnect(
        &self,
        registry: &mut Registry,
        client: SocketAddr,
        device: &str,
        now: Instant,
    ) -> Result<(), BrokerError> {
        registry.find_client(client)?;
        let dev = registry.find_device(device)?;

        if !registry.is_linked(client, device) {
            return Ok(());
        }

        if dev.client_count() == 1 && dev.status().is_active() {
            self.machine
                .transition(registry, device, LinkStatus::Disconnecting, now)
                .await?;
        }

        // A force-down during the transition may already have cut the edge.
        registry.unlink(client, device)?;
        debug!("client {client} released {device}");
        Ok(())
    }

    /// Disconnects `client` from every device it uses.
    ///
    /// Every edge is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// The first error encountered, after the whole pass.
    pub async fn disconnect_all_for_client(
        &self,
        registry: &mut Registry,
        client: SocketAddr,
        now: Instant,
    ) -> Result<(), BrokerError> {
        let devices: Vec<String> = registry
            .find_client(client)?
            .connected_devices()
            .map(str::to_string)
            .collect();

        let mut first_error = None;
        for device in devices {
            if let Err(e) = self.disconnect(registry, client, &device, now).await {
                debug!("could not disconnect client {client} from {device}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Disconnects every client from `device`.
    ///
    /// Every edge is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// The first error encountered, after the whole pass.
    pub async fn disconnect_all_for_device(
        &self,
        registry: &mut Registry,
        device: &str,
        now: Instant,
    ) -> Result<(), BrokerError> {
        let clients: Vec<SocketAddr> = registry
            .find_device(device)?
            .connected_clients()
            .copied()
            .collect();

        let mut first_error = None;
        for client in clients {
            if let Err(e) = self.disconnect(registry, client, device, now).await {
                debug!("could not disconnect client {client} from {device}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
