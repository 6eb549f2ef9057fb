//! CommandProcessor: turns one inbound datagram into registry changes and an
//! optional reply.
//!
//! # Caller classes
//!
//! - `CLIENT ...` comes from a client.  The sender address is resolved to a
//!   [`Client`](super::registry::Client) (created on first contact) and its
//!   liveness refreshed *before* the command is looked at, so even a rejected
//!   command keeps the client alive.
//! - `NOTIFY ...` comes from a notification peer reporting what the link
//!   really did.  Peers are never registered as clients.
//!
//! Lookup misses surface as [`BrokerError::NotFound`]; the broker drops those
//! without replying.

use std::net::SocketAddr;
use std::time::Instant;

use link_core::protocol::CLIENT_PREFIX;
use link_core::{decode_inbound, ClientCommand, Inbound, LinkStatus, PeerNotice, ServerReply};
use tracing::debug;

use super::error::BrokerError;
use super::registry::Registry;
use super::relationships::RelationshipGraph;

/// Executes decoded commands against the registry.
pub struct CommandProcessor<'a> {
    graph: &'a RelationshipGraph,
}

impl<'a> CommandProcessor<'a> {
    pub fn new(graph: &'a RelationshipGraph) -> Self {
        Self { graph }
    }

    /// Decodes and executes a raw datagram from `sender`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Unsupported`] if the datagram cannot be decoded, plus
    /// anything [`CommandProcessor::execute`] returns.
    pub async fn handle_datagram(
        &self,
        registry: &mut Registry,
        sender: SocketAddr,
        bytes: &[u8],
        now: Instant,
    ) -> Result<Option<ServerReply>, BrokerError> {
        let inbound = match decode_inbound(bytes) {
            Ok(inbound) => inbound,
            Err(e) => {
                if bytes.starts_with(CLIENT_PREFIX.as_bytes()) {
                    registry.touch_client(sender, now);
                }
                return Err(e.into());
            }
        };
        self.execute(registry, sender, inbound, now).await
    }

    /// Executes one decoded message from `sender`.
    ///
    /// Returns the reply to send back, if the command has one.
    pub async fn execute(
        &self,
        registry: &mut Registry,
        sender: SocketAddr,
        inbound: Inbound,
        now: Instant,
    ) -> Result<Option<ServerReply>, BrokerError> {
        debug!("command from {sender}: {inbound:?}");
        match inbound {
            Inbound::Client(command) => {
                if registry.touch_client(sender, now) {
                    debug!("new client {sender}");
                }
                self.execute_client(registry, sender, command, now).await
            }
            Inbound::Peer(notice) => {
                self.execute_peer(registry, notice, now).await?;
                Ok(None)
            }
        }
    }

    async fn execute_client(
        &self,
        registry: &mut Registry,
        sender: SocketAddr,
        command: ClientCommand,
        now: Instant,
    ) -> Result<Option<ServerReply>, BrokerError> {
        match command {
            ClientCommand::Ping => Ok(None),

            ClientCommand::Devices => Ok(Some(ServerReply::Devices(
                registry.devices().map(|d| d.listing()).collect(),
            ))),

            ClientCommand::Up(name) => {
                self.graph.connect(registry, sender, &name, now).await?;
                Ok(None)
            }

            ClientCommand::Down(name) => {
                // Only devices the caller is actually using can be released.
                if !registry.find_client(sender)?.is_using(&name) {
                    return Err(BrokerError::device_not_found(&name));
                }
                self.graph.disconnect(registry, sender, &name, now).await?;
                Ok(None)
            }

            ClientCommand::ForceDown(name) => {
                if registry.find_device(&name)?.status() != LinkStatus::Down {
                    self.graph
                        .machine()
                        .transition(registry, &name, LinkStatus::Down, now)
                        .await?;
                }
                self.graph
                    .disconnect_all_for_device(registry, &name, now)
                    .await?;
                Ok(None)
            }

            ClientCommand::Status(name) => Ok(Some(ServerReply::Status(
                registry.find_device(&name)?.status_line(now),
            ))),

            ClientCommand::ClientStatus => Ok(Some(ServerReply::ClientStatus(
                registry
                    .find_client(sender)?
                    .connected_devices()
                    .map(str::to_string)
                    .collect(),
            ))),
        }
    }

    async fn execute_peer(
        &self,
        registry: &mut Registry,
        notice: PeerNotice,
        now: Instant,
    ) -> Result<(), BrokerError> {
        let target = match notice {
            PeerNotice::IsUp(_) => LinkStatus::Up,
            PeerNotice::IsDown(_) => LinkStatus::Down,
        };
        self.graph
            .machine()
            .transition(registry, notice.device(), target, now)
            .await?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
