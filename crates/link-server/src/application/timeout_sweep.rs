//! TimeoutSweeper: evicts silent clients and nudges stuck devices.
//!
//! Runs once per poll tick, clients first and then devices:
//!
//! 1. A client not heard from for longer than `client_timeout` is disconnected
//!    from every device it uses and then forgotten.  If any disconnect fails
//!    the client is kept and tried again on the next tick.
//! 2. A device that has been CONNECTING longer than `connect_timeout` is
//!    re-submitted to CONNECTING (one retry, or give up).  A device that has
//!    been DISCONNECTING longer than `disconnect_timeout` is re-submitted to
//!    DISCONNECTING, which forces it down.
//!
//! A failure on one item is logged and the sweep moves on to the next.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use link_core::LinkStatus;
use tracing::{info, warn};

use super::registry::Registry;
use super::relationships::RelationshipGraph;

/// Timeouts used by the sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSettings {
    pub client_timeout: Duration,
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            client_timeout: Duration::from_secs(2400),
            connect_timeout: Duration::from_secs(60),
            disconnect_timeout: Duration::from_secs(60),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Clients removed for inactivity.
    pub evicted_clients: Vec<SocketAddr>,
    /// CONNECTING devices re-submitted to CONNECTING.
    pub retried_devices: Vec<String>,
    /// DISCONNECTING devices re-submitted to DISCONNECTING.
    pub forced_devices: Vec<String>,
    /// Items whose handling failed and will be revisited next tick.
    pub failures: usize,
}

impl SweepReport {
    /// Returns `true` if the sweep changed nothing and hit no errors.
    pub fn is_idle(&self) -> bool {
        self.evicted_clients.is_empty()
            && self.retried_devices.is_empty()
            && self.forced_devices.is_empty()
            && self.failures == 0
    }
}

/// Applies the inactivity and transition timeouts.
pub struct TimeoutSweeper {
    settings: SweepSettings,
}

impl TimeoutSweeper {
    pub fn new(settings: SweepSettings) -> Self {
        Self { settings }
    }

    /// Runs one sweep as of `now`.
    pub async fn sweep(
        &self,
        registry: &mut Registry,
        graph: &RelationshipGraph,
        now: Instant,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        self.sweep_clients(registry, graph, now, &mut report).await;
        self.sweep_devices(registry, graph, now, &mut report).await;
        report
    }

    async fn sweep_clients(
        &self,
        registry: &mut Registry,
        graph: &RelationshipGraph,
        now: Instant,
        report: &mut SweepReport,
    ) {
        let expired: Vec<SocketAddr> = registry
            .clients()
            .filter(|c| {
                now.saturating_duration_since(c.last_heard_from()) > self.settings.client_timeout
            })
            .map(|c| c.address())
            .collect();

        for address in expired {
            if let Err(e) = graph.disconnect_all_for_client(registry, address, now).await {
                warn!("could not release devices of silent client {address}: {e}");
                report.failures += 1;
                continue;
            }
            match registry.remove_client(address) {
                Ok(_) => {
                    info!("client {address} timed out and was removed");
                    report.evicted_clients.push(address);
                }
                Err(e) => {
                    warn!("could not remove client {address}: {e}");
                    report.failures += 1;
                }
            }
        }
    }

    async fn sweep_devices(
        &self,
        registry: &mut Registry,
        graph: &RelationshipGraph,
        now: Instant,
        report: &mut SweepReport,
    ) {
        let stuck: Vec<(String, LinkStatus)> = registry
            .devices()
            .filter_map(|d| {
                let limit = match d.status() {
                    LinkStatus::Connecting => self.settings.connect_timeout,
                    LinkStatus::Disconnecting => self.settings.disconnect_timeout,
                    LinkStatus::Down | LinkStatus::Up => return None,
                };
                let since = d.connect_time()?;
                (now.saturating_duration_since(since) > limit)
                    .then(|| (d.name().to_string(), d.status()))
            })
            .collect();

        for (name, status) in stuck {
            info!("device {name} has been {status} too long");
            match graph
                .machine()
                .transition(registry, &name, status, now)
                .await
            {
                Ok(_) if status == LinkStatus::Connecting => report.retried_devices.push(name),
                Ok(_) => report.forced_devices.push(name),
                Err(e) => {
                    warn!("timeout handling for device {name} failed: {e}");
                    report.failures += 1;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
