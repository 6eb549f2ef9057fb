//! Broker: the single owner of all server state.
//!
//! The reactor hands every datagram and every poll tick to the broker; the
//! broker routes them through the [`CommandProcessor`], the
//! [`StatusBroadcaster`] and the [`TimeoutSweeper`] and applies the error
//! policy:
//!
//! | Error                                   | Policy                         |
//! |-----------------------------------------|--------------------------------|
//! | `NotFound`                              | dropped silently (debug log)   |
//! | `Unsupported`                           | dropped (debug log)            |
//! | `InvalidTransition`, `ActivationFailed` | logged at warn, state kept     |
//! | reply refused by the client             | ignored                        |
//! | other send failures                     | logged at warn                 |
//!
//! Nothing here is shared between tasks: the reactor owns the broker and
//! borrows it mutably for each event, so no locking is needed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use link_core::{encode_reply, ServerReply};
use tracing::{debug, trace, warn};

use super::command_processor::CommandProcessor;
use super::error::BrokerError;
use super::link_state::{LinkActivator, LinkStateMachine, StateMachineSettings};
use super::registry::Registry;
use super::relationships::RelationshipGraph;
use super::status_broadcast::{DatagramSink, StatusBroadcaster};
use super::timeout_sweep::{SweepReport, SweepSettings, TimeoutSweeper};

/// Everything the broker needs besides the registry and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub state_machine: StateMachineSettings,
    pub sweep: SweepSettings,
    /// Destination of `BROADCAST` datagrams.
    pub multicast_group: SocketAddr,
}

/// Owns the registry and routes events through the application components.
pub struct Broker {
    registry: Registry,
    graph: RelationshipGraph,
    broadcaster: StatusBroadcaster,
    sweeper: TimeoutSweeper,
    sink: Arc<dyn DatagramSink>,
}

impl Broker {
    pub fn new(
        registry: Registry,
        activator: Arc<dyn LinkActivator>,
        sink: Arc<dyn DatagramSink>,
        settings: BrokerSettings,
    ) -> Self {
        let machine = LinkStateMachine::new(activator, settings.state_machine);
        Self {
            registry,
            graph: RelationshipGraph::new(machine),
            broadcaster: StatusBroadcaster::new(sink.clone(), settings.multicast_group),
            sweeper: TimeoutSweeper::new(settings.sweep),
            sink,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Processes one datagram from `sender` received at `now`, replying if
    /// the command calls for it.
    ///
    /// Command failures are logged according to the error policy and never
    /// reach the caller.
    pub async fn handle_datagram(&mut self, sender: SocketAddr, bytes: &[u8], now: Instant) {
        let processor = CommandProcessor::new(&self.graph);
        let outcome = processor
            .handle_datagram(&mut self.registry, sender, bytes, now)
            .await;

        match outcome {
            Ok(Some(reply)) => self.send_reply(&reply, sender).await,
            Ok(None) => {}
            Err(e @ (BrokerError::NotFound(_) | BrokerError::Unsupported(_))) => {
                debug!("dropping datagram from {sender}: {e}");
            }
            Err(e @ BrokerError::AlreadyExists(_)) => {
                debug!("datagram from {sender}: {e}");
            }
            Err(e) => warn!("command from {sender} failed: {e}"),
        }
    }

    /// Periodic work: broadcast every device's status, then run the sweeper.
    pub async fn tick(&mut self, now: Instant) -> SweepReport {
        if let Err(e) = self.broadcaster.broadcast_status(&self.registry, now).await {
            warn!("status broadcast failed: {e}");
        }

        let report = self
            .sweeper
            .sweep(&mut self.registry, &self.graph, now)
            .await;
        if !report.is_idle() {
            debug!("sweep: {report:?}");
        }

        trace!("registry after tick:\n{}", self.registry.dump(now));
        report
    }

    /// Sends `BROADCAST INIT`.
    pub async fn announce_init(&self) -> Result<(), BrokerError> {
        self.broadcaster.announce_init().await
    }

    /// Sends `BROADCAST QUIT`.
    pub async fn announce_quit(&self) -> Result<(), BrokerError> {
        self.broadcaster.announce_quit().await
    }

    async fn send_reply(&self, reply: &ServerReply, target: SocketAddr) {
        let payload = encode_reply(reply);
        match self.sink.send_to(payload.as_bytes(), target).await {
            Ok(_) => debug!("replied to {target}: {payload:?}"),
            // The client went away between asking and our answer.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("reply to {target} refused");
            }
            Err(e) => warn!("{}", BrokerError::Transport(e)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::registry::{ActivationCommands, Device};
    use crate::application::status_broadcast::MockDatagramSink;
    use crate::infrastructure::activator::mock::RecordingActivator;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            state_machine: StateMachineSettings {
                retries: 2,
                force_down_settle: Duration::ZERO,
            },
            sweep: SweepSettings::default(),
            multicast_group: "239.255.42.42:6789".parse().unwrap(),
        }
    }

    fn make_broker(sink: MockDatagramSink) -> Broker {
        let mut registry = Registry::new();
        registry
            .add_device(Device::new(
                "modem1",
                "Dial-up modem",
                ActivationCommands::default(),
            ))
            .unwrap();
        Broker::new(
            registry,
            Arc::new(RecordingActivator::new()),
            Arc::new(sink),
            settings(),
        )
    }

    fn client() -> SocketAddr {
        "10.0.0.1:5000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_status_reply_is_sent_to_sender() {
        // Arrange
        let mut sink = MockDatagramSink::new();
        sink.expect_send_to()
            .withf(|payload, target| {
                &payload[..] == b"SERVER STATUS modem1\tDOWN" && *target == client()
            })
            .times(1)
            .returning(|payload, _| Ok(payload.len()));
        let mut broker = make_broker(sink);

        // Act / Assert
        broker
            .handle_datagram(client(), b"CLIENT STATUS modem1", Instant::now())
            .await;
    }

    #[tokio::test]
    async fn test_unknown_device_gets_no_reply() {
        let mut sink = MockDatagramSink::new();
        sink.expect_send_to().times(0);
        let mut broker = make_broker(sink);

        broker
            .handle_datagram(client(), b"CLIENT STATUS nosuch", Instant::now())
            .await;

        assert_eq!(broker.registry().client_count(), 1);
    }

    #[tokio::test]
    async fn test_refused_reply_is_ignored() {
        let mut sink = MockDatagramSink::new();
        sink.expect_send_to()
            .times(1)
            .returning(|_, _| Err(io::Error::from(io::ErrorKind::ConnectionRefused)));
        let mut broker = make_broker(sink);

        broker
            .handle_datagram(client(), b"CLIENT DEVICES", Instant::now())
            .await;

        assert_eq!(broker.registry().client_count(), 1);
    }

    #[tokio::test]
    async fn test_tick_broadcasts_status_to_group() {
        let mut sink = MockDatagramSink::new();
        sink.expect_send_to()
            .withf(|payload, target| {
                payload.starts_with(b"BROADCAST STATUS ")
                    && *target == "239.255.42.42:6789".parse::<SocketAddr>().unwrap()
            })
            .times(1)
            .returning(|payload, _| Ok(payload.len()));
        let mut broker = make_broker(sink);

        let report = broker.tick(Instant::now()).await;

        assert!(report.is_idle());
    }

    #[tokio::test]
    async fn test_tick_continues_when_broadcast_fails() {
        // Arrange
        let mut sink = MockDatagramSink::new();
        sink.expect_send_to()
            .returning(|_, _| Err(io::Error::new(io::ErrorKind::Other, "network unreachable")));
        let mut broker = make_broker(sink);
        let start = Instant::now();
        broker.handle_datagram(client(), b"CLIENT PING", start).await;

        // Act
        let report = broker.tick(start + Duration::from_secs(2401)).await;

        // Assert
        assert_eq!(report.evicted_clients, vec![client()]);
    }
}
