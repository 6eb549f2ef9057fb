//! LinkStateMachine: the per-device DOWN / CONNECTING / UP / DISCONNECTING
//! life cycle.
//!
//! Every status change of a device goes through [`LinkStateMachine::transition`].
//! The machine looks at the pair *(current status, requested status)* and either
//! runs the matching action or rejects the request with
//! [`BrokerError::InvalidTransition`]:
//!
//! ```text
//! DOWN          ──activate-up──────────────►  CONNECTING
//! CONNECTING    ──peer ISUP────────────────►  UP
//! CONNECTING    ──retry / give up──────────►  CONNECTING / DOWN
//! UP            ──activate-down────────────►  DISCONNECTING
//! DISCONNECTING ──peer ISDOWN──────────────►  DOWN
//! DISCONNECTING ──force-down, settle───────►  DOWN ► CONNECTING
//! any active    ──force-down───────────────►  DOWN
//! ```
//!
//! # Side effects
//!
//! The three activation commands of a device (up, down, force-down) are run
//! through the injected [`LinkActivator`] and awaited before the status is
//! advanced.  A nonzero exit status aborts the transition with
//! [`BrokerError::ActivationFailed`] and leaves the status untouched.
//!
//! A successful force-down also severs every relationship edge of the device.
//! The severance is a plain registry operation and never triggers another
//! transition.
//!
//! # Retrying (for beginners)
//!
//! A device stuck in CONNECTING is re-submitted to CONNECTING by the timeout
//! sweeper.  Instead of calling itself recursively, the machine computes a
//! [`RetryDecision`] from the remaining retry budget and acts on it: either
//! spend one retry and run activate-up again, or give up and force the link
//! down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use link_core::LinkStatus;
use tracing::{debug, info, warn};

use super::error::BrokerError;
use super::registry::Registry;

/// Exit status reported when an activation command could not be executed.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Runs a device's activation command and reports its exit status.
///
/// `0` means success.  [`EXEC_FAILURE_STATUS`] means the command could not be
/// started at all.  Production code spawns a shell; tests record the calls.
#[async_trait]
pub trait LinkActivator: Send + Sync {
    /// Runs `command` to completion and returns its exit status.
    async fn invoke(&self, command: &str) -> i32;
}

/// Which of a device's activation commands to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Up,
    Down,
    ForceDown,
}

impl Activation {
    fn label(self) -> &'static str {
        match self {
            Activation::Up => "link-up",
            Activation::Down => "link-down",
            Activation::ForceDown => "link-force-down",
        }
    }
}

/// Outcome of re-submitting a CONNECTING device to CONNECTING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Spend one retry and run activate-up again.
    Retry,
    /// The retry budget is spent; force the link down.
    GiveUp,
}

impl RetryDecision {
    /// Decides based on the retries a device has left.
    pub fn from_remaining(retries_remaining: u32) -> Self {
        if retries_remaining > 0 {
            RetryDecision::Retry
        } else {
            RetryDecision::GiveUp
        }
    }
}

/// Tunables of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachineSettings {
    /// Retry budget granted to each fresh CONNECTING attempt.
    pub retries: u32,
    /// Pause between a forced teardown and the next bring-up attempt.
    pub force_down_settle: Duration,
}

impl Default for StateMachineSettings {
    fn default() -> Self {
        Self {
            retries: 2,
            force_down_settle: Duration::from_secs(2),
        }
    }
}

/// Drives device status changes and their side effects.
pub struct LinkStateMachine {
    activator: Arc<dyn LinkActivator>,
    settings: StateMachineSettings,
}

impl LinkStateMachine {
    pub fn new(activator: Arc<dyn LinkActivator>, settings: StateMachineSettings) -> Self {
        Self {
            activator,
            settings,
        }
    }

    /// Requests that device `name` move to `target`.
    ///
    /// Returns the status the device ended up in, which differs from `target`
    /// when a retry gives up or a disconnect times out.  `now` is the time
    /// recorded as the device's `connect_time` when one is stamped.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::NotFound`] if the device is unknown.
    /// - [`BrokerError::InvalidTransition`] if `target` cannot be reached from
    ///   the current status.  Nothing is changed.
    /// - [`BrokerError::ActivationFailed`] if an activation command exits
    ///   nonzero.  The status is not advanced.
    pub async fn transition(
        &self,
        registry: &mut Registry,
        name: &str,
        target: LinkStatus,
        now: Instant,
    ) -> Result<LinkStatus, BrokerError> {
        use LinkStatus::{Connecting, Disconnecting, Down, Up};

        let current = registry.find_device(name)?.status();
        debug!("device {name}: transition {current} -> {target} requested");

        let reached = match (current, target) {
            (Down, Connecting) => self.begin_connecting(registry, name, now).await?,

            (Connecting, Connecting) => {
                let remaining = registry.find_device(name)?.retries_remaining();
                match RetryDecision::from_remaining(remaining) {
                    RetryDecision::Retry => {
                        registry
                            .find_device_mut(name)?
                            .set_retries_remaining(remaining - 1);
                        info!(
                            "device {name}: retrying link-up ({} retries left)",
                            remaining - 1
                        );
                        self.activate(registry, name, Activation::Up, now).await?;
                        Connecting
                    }
                    RetryDecision::GiveUp => {
                        warn!("device {name}: link-up retries exhausted, giving up");
                        self.force_down(registry, name).await?;
                        self.enter(registry, name, Down)?
                    }
                }
            }

            (Disconnecting, Connecting) => {
                self.force_down(registry, name).await?;
                if !self.settings.force_down_settle.is_zero() {
                    tokio::time::sleep(self.settings.force_down_settle).await;
                }
                self.enter(registry, name, Down)?;
                self.begin_connecting(registry, name, now).await?
            }

            (Connecting, Up) => {
                registry
                    .find_device_mut(name)?
                    .stamp_connect_time(now);
                self.enter(registry, name, Up)?
            }

            (Connecting, Disconnecting) => {
                self.force_down(registry, name).await?;
                registry
                    .find_device_mut(name)?
                    .stamp_connect_time(now);
                self.enter(registry, name, Disconnecting)?
            }

            (Up, Disconnecting) => {
                self.activate(registry, name, Activation::Down, now).await?;
                self.enter(registry, name, Disconnecting)?
            }

            (Disconnecting, Disconnecting) => {
                warn!("device {name}: link-down timed out, forcing");
                self.force_down(registry, name).await?;
                self.enter(registry, name, Down)?
            }

            (Connecting, Down) | (Up, Down) => {
                self.force_down(registry, name).await?;
                self.enter(registry, name, Down)?
            }

            (Disconnecting, Down) => self.enter(registry, name, Down)?,

            (from, to) => {
                return Err(BrokerError::InvalidTransition {
                    device: name.to_string(),
                    from,
                    to,
                })
            }
        };

        Ok(reached)
    }

    /// DOWN → CONNECTING with a fresh retry budget.
    async fn begin_connecting(
        &self,
        registry: &mut Registry,
        name: &str,
        now: Instant,
    ) -> Result<LinkStatus, BrokerError> {
        self.activate(registry, name, Activation::Up, now).await?;
        registry
            .find_device_mut(name)?
            .set_retries_remaining(self.settings.retries);
        self.enter(registry, name, LinkStatus::Connecting)
    }

    /// Runs activate-up or activate-down and stamps `connect_time` on success.
    async fn activate(
        &self,
        registry: &mut Registry,
        name: &str,
        which: Activation,
        now: Instant,
    ) -> Result<(), BrokerError> {
        self.run(registry, name, which).await?;
        registry
            .find_device_mut(name)?
            .stamp_connect_time(now);
        Ok(())
    }

    /// Runs force-down and severs every edge of the device on success.
    async fn force_down(&self, registry: &mut Registry, name: &str) -> Result<(), BrokerError> {
        self.run(registry, name, Activation::ForceDown).await?;
        let severed = registry.sever_device(name)?;
        if !severed.is_empty() {
            info!(
                "device {name}: forced down, disconnected {} client(s)",
                severed.len()
            );
        }
        Ok(())
    }

    async fn run(
        &self,
        registry: &Registry,
        name: &str,
        which: Activation,
    ) -> Result<(), BrokerError> {
        let commands = registry.find_device(name)?.commands();
        let command = match which {
            Activation::Up => commands.up.clone(),
            Activation::Down => commands.down.clone(),
            Activation::ForceDown => commands.force_down.clone(),
        };

        debug!("device {name}: running {} command {command:?}", which.label());
        let status = self.activator.invoke(&command).await;
        if status == 0 {
            return Ok(());
        }

        if status == EXEC_FAILURE_STATUS {
            warn!(
                "device {name}: {} command {command:?} could not be executed",
                which.label()
            );
        } else {
            warn!(
                "device {name}: {} command {command:?} exited with status {status}",
                which.label()
            );
        }
        Err(BrokerError::ActivationFailed {
            device: name.to_string(),
            command,
            status,
        })
    }

    fn enter(
        &self,
        registry: &mut Registry,
        name: &str,
        status: LinkStatus,
    ) -> Result<LinkStatus, BrokerError> {
        let device = registry.find_device_mut(name)?;
        let previous = device.status();
        device.set_status(status);
        info!("device {name}: {previous} -> {status}");
        Ok(status)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::application::registry::{ActivationCommands, Device};
    use crate::infrastructure::activator::mock::RecordingActivator;

    const UP: &str = "ifup ppp0";
    const DOWN: &str = "ifdown ppp0";
    const KILL: &str = "killall pppd";

    fn make_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .add_device(Device::new(
                "modem1",
                "Dial-up modem",
                ActivationCommands {
                    up: UP.to_string(),
                    down: DOWN.to_string(),
                    force_down: KILL.to_string(),
                },
            ))
            .unwrap();
        registry
    }

    fn make_machine(retries: u32) -> (LinkStateMachine, Arc<RecordingActivator>) {
        let activator = Arc::new(RecordingActivator::new());
        let machine = LinkStateMachine::new(
            activator.clone(),
            StateMachineSettings {
                retries,
                force_down_settle: Duration::ZERO,
            },
        );
        (machine, activator)
    }

    fn status(registry: &Registry) -> LinkStatus {
        registry.find_device("modem1").unwrap().status()
    }

    async fn drive_to(machine: &LinkStateMachine, registry: &mut Registry, path: &[LinkStatus]) {
        for step in path {
            machine.transition(registry, "modem1", *step, Instant::now()).await.unwrap();
        }
    }

    #[test]
    fn test_retry_decision_from_remaining() {
        assert_eq!(RetryDecision::from_remaining(2), RetryDecision::Retry);
        assert_eq!(RetryDecision::from_remaining(1), RetryDecision::Retry);
        assert_eq!(RetryDecision::from_remaining(0), RetryDecision::GiveUp);
    }

    #[tokio::test]
    async fn test_down_to_connecting_runs_link_up_and_resets_retries() {
        // Arrange
        let mut registry = make_registry();
        let (machine, activator) = make_machine(3);

        // Act
        let reached = machine
            .transition(&mut registry, "modem1", LinkStatus::Connecting, Instant::now())
            .await
            .unwrap();

        // Assert
        assert_eq!(reached, LinkStatus::Connecting);
        assert_eq!(activator.calls(), vec![UP.to_string()]);
        let device = registry.find_device("modem1").unwrap();
        assert_eq!(device.retries_remaining(), 3);
        assert!(device.connect_time().is_some());
    }

    #[tokio::test]
    async fn test_failed_link_up_leaves_device_down() {
        // Arrange
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        activator.fail_command(UP, 1);

        // Act
        let result = machine
            .transition(&mut registry, "modem1", LinkStatus::Connecting, Instant::now())
            .await;

        // Assert
        assert!(matches!(
            result,
            Err(BrokerError::ActivationFailed { status: 1, .. })
        ));
        assert_eq!(status(&registry), LinkStatus::Down);
        assert!(registry.find_device("modem1").unwrap().connect_time().is_none());
    }

    #[tokio::test]
    async fn test_exec_failure_is_reported_as_activation_failure() {
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        activator.fail_command(UP, EXEC_FAILURE_STATUS);

        let result = machine
            .transition(&mut registry, "modem1", LinkStatus::Connecting, Instant::now())
            .await;

        assert!(matches!(
            result,
            Err(BrokerError::ActivationFailed { status: EXEC_FAILURE_STATUS, .. })
        ));
        assert_eq!(status(&registry), LinkStatus::Down);
    }

    #[tokio::test]
    async fn test_connecting_to_up_on_peer_notice() {
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        drive_to(&machine, &mut registry, &[LinkStatus::Connecting]).await;

        let reached = machine
            .transition(&mut registry, "modem1", LinkStatus::Up, Instant::now())
            .await
            .unwrap();

        assert_eq!(reached, LinkStatus::Up);
        assert_eq!(activator.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhaust_into_down_after_retries_plus_one_attempts() {
        // Arrange
        let retries = 2;
        let mut registry = make_registry();
        let (machine, activator) = make_machine(retries);
        drive_to(&machine, &mut registry, &[LinkStatus::Connecting]).await;

        // Act: one re-submission per retry, then one more that gives up.
        let mut outcomes = Vec::new();
        for _ in 0..=retries {
            outcomes.push(
                machine
                    .transition(&mut registry, "modem1", LinkStatus::Connecting, Instant::now())
                    .await
                    .unwrap(),
            );
        }

        // Assert
        assert_eq!(
            outcomes,
            vec![LinkStatus::Connecting, LinkStatus::Connecting, LinkStatus::Down]
        );
        assert_eq!(activator.count(UP), retries as usize + 1);
        assert_eq!(activator.count(KILL), 1);
        assert_eq!(status(&registry), LinkStatus::Down);
    }

    #[tokio::test]
    async fn test_failed_retry_still_consumes_an_attempt() {
        // Arrange
        let mut registry = make_registry();
        let (machine, activator) = make_machine(1);
        drive_to(&machine, &mut registry, &[LinkStatus::Connecting]).await;
        activator.fail_command(UP, 1);

        // Act
        let first = machine
            .transition(&mut registry, "modem1", LinkStatus::Connecting, Instant::now())
            .await;
        let second = machine
            .transition(&mut registry, "modem1", LinkStatus::Connecting, Instant::now())
            .await;

        // Assert
        assert!(first.is_err());
        assert_eq!(second.unwrap(), LinkStatus::Down);
        assert_eq!(registry.find_device("modem1").unwrap().retries_remaining(), 0);
    }

    #[tokio::test]
    async fn test_up_to_disconnecting_runs_link_down() {
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        drive_to(&machine, &mut registry, &[LinkStatus::Connecting, LinkStatus::Up]).await;

        machine
            .transition(&mut registry, "modem1", LinkStatus::Disconnecting, Instant::now())
            .await
            .unwrap();

        assert_eq!(status(&registry), LinkStatus::Disconnecting);
        assert_eq!(activator.calls(), vec![UP.to_string(), DOWN.to_string()]);
    }

    #[tokio::test]
    async fn test_disconnecting_to_down_runs_no_command() {
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        drive_to(
            &machine,
            &mut registry,
            &[LinkStatus::Connecting, LinkStatus::Up, LinkStatus::Disconnecting],
        )
        .await;

        machine
            .transition(&mut registry, "modem1", LinkStatus::Down, Instant::now())
            .await
            .unwrap();

        assert_eq!(status(&registry), LinkStatus::Down);
        assert_eq!(activator.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_timeout_forces_down() {
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        drive_to(
            &machine,
            &mut registry,
            &[LinkStatus::Connecting, LinkStatus::Up, LinkStatus::Disconnecting],
        )
        .await;

        let reached = machine
            .transition(&mut registry, "modem1", LinkStatus::Disconnecting, Instant::now())
            .await
            .unwrap();

        assert_eq!(reached, LinkStatus::Down);
        assert_eq!(activator.count(KILL), 1);
    }

    #[tokio::test]
    async fn test_disconnecting_to_connecting_forces_down_then_reconnects() {
        // Arrange
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        drive_to(
            &machine,
            &mut registry,
            &[LinkStatus::Connecting, LinkStatus::Up, LinkStatus::Disconnecting],
        )
        .await;
        activator.clear();

        // Act
        let reached = machine
            .transition(&mut registry, "modem1", LinkStatus::Connecting, Instant::now())
            .await
            .unwrap();

        // Assert
        assert_eq!(reached, LinkStatus::Connecting);
        assert_eq!(activator.calls(), vec![KILL.to_string(), UP.to_string()]);
        assert_eq!(registry.find_device("modem1").unwrap().retries_remaining(), 2);
    }

    #[tokio::test]
    async fn test_force_down_severs_every_edge() {
        // Arrange
        let mut registry = make_registry();
        let (machine, _activator) = make_machine(2);
        let now = Instant::now();
        let clients: Vec<SocketAddr> = vec!["10.0.0.1:1".parse().unwrap(), "10.0.0.2:1".parse().unwrap()];
        drive_to(&machine, &mut registry, &[LinkStatus::Connecting, LinkStatus::Up]).await;
        for c in &clients {
            registry.touch_client(*c, now);
            registry.link(*c, "modem1").unwrap();
        }

        // Act
        machine
            .transition(&mut registry, "modem1", LinkStatus::Down, Instant::now())
            .await
            .unwrap();

        // Assert
        assert_eq!(status(&registry), LinkStatus::Down);
        assert_eq!(registry.find_device("modem1").unwrap().client_count(), 0);
        for c in &clients {
            assert!(!registry.is_linked(*c, "modem1"));
        }
        assert!(registry.edges_are_symmetric());
    }

    #[tokio::test]
    async fn test_connecting_to_down_forces_down_and_severs_edges() {
        // Arrange
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        let client: SocketAddr = "10.0.0.1:1".parse().unwrap();
        drive_to(&machine, &mut registry, &[LinkStatus::Connecting]).await;
        registry.touch_client(client, Instant::now());
        registry.link(client, "modem1").unwrap();

        // Act
        let reached = machine
            .transition(&mut registry, "modem1", LinkStatus::Down, Instant::now())
            .await
            .unwrap();

        // Assert
        assert_eq!(reached, LinkStatus::Down);
        assert_eq!(activator.calls(), vec![UP.to_string(), KILL.to_string()]);
        assert_eq!(registry.find_device("modem1").unwrap().client_count(), 0);
        assert!(!registry.is_linked(client, "modem1"));
        assert!(registry.edges_are_symmetric());
    }

    #[tokio::test]
    async fn test_connect_time_is_the_supplied_clock() {
        let mut registry = make_registry();
        let (machine, _activator) = make_machine(2);
        let at = Instant::now() + Duration::from_secs(3600);

        machine
            .transition(&mut registry, "modem1", LinkStatus::Connecting, at)
            .await
            .unwrap();

        assert_eq!(registry.find_device("modem1").unwrap().connect_time(), Some(at));
    }

    #[tokio::test]
    async fn test_failed_force_down_keeps_state_and_edges() {
        let mut registry = make_registry();
        let (machine, activator) = make_machine(2);
        let client: SocketAddr = "10.0.0.1:1".parse().unwrap();
        drive_to(&machine, &mut registry, &[LinkStatus::Connecting, LinkStatus::Up]).await;
        registry.touch_client(client, Instant::now());
        registry.link(client, "modem1").unwrap();
        activator.fail_command(KILL, 2);

        let result = machine
            .transition(&mut registry, "modem1", LinkStatus::Down, Instant::now())
            .await;

        assert!(result.is_err());
        assert_eq!(status(&registry), LinkStatus::Up);
        assert!(registry.is_linked(client, "modem1"));
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_rejected_without_state_change() {
        // (path to reach the starting state, illegal target)
        let cases = [
            (vec![], LinkStatus::Down),
            (vec![], LinkStatus::Up),
            (vec![], LinkStatus::Disconnecting),
            (vec![LinkStatus::Connecting, LinkStatus::Up], LinkStatus::Up),
            (vec![LinkStatus::Connecting, LinkStatus::Up], LinkStatus::Connecting),
            (
                vec![LinkStatus::Connecting, LinkStatus::Up, LinkStatus::Disconnecting],
                LinkStatus::Up,
            ),
        ];

        for (path, target) in cases {
            let mut registry = make_registry();
            let (machine, activator) = make_machine(2);
            drive_to(&machine, &mut registry, &path).await;
            let before = status(&registry);
            let calls_before = activator.calls().len();

            let result = machine.transition(&mut registry, "modem1", target, Instant::now()).await;

            assert!(
                matches!(result, Err(BrokerError::InvalidTransition { from, to, .. }) if from == before && to == target),
                "{before} -> {target} should be rejected"
            );
            assert_eq!(status(&registry), before);
            assert_eq!(activator.calls().len(), calls_before);
        }
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let mut registry = make_registry();
        let (machine, _activator) = make_machine(2);
        let result = machine
            .transition(&mut registry, "ppp9", LinkStatus::Connecting, Instant::now())
            .await;
        assert!(matches!(result, Err(ref e) if e.is_not_found()));
    }
}
