//! Link activation infrastructure.
//!
//! [`ShellActivator`] is the production [`LinkActivator`]: every activation
//! command is handed to `sh -c` and awaited.  The device configuration decides
//! what actually happens (dialing a modem, raising an ISDN channel, starting a
//! VPN), the server only cares about the exit status.
//!
//! # Testability
//!
//! The `mock` sub-module provides a recording activator that never spawns a
//! process, so the state machine can be exercised without side effects.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::link_state::{LinkActivator, EXEC_FAILURE_STATUS};

pub mod mock;

/// Shell used to interpret activation commands.
const SHELL: &str = "/bin/sh";

/// Runs activation commands through `/bin/sh -c`.
#[derive(Debug, Default, Clone)]
pub struct ShellActivator;

impl ShellActivator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LinkActivator for ShellActivator {
    async fn invoke(&self, command: &str) -> i32 {
        if command.trim().is_empty() {
            debug!("empty activation command; nothing to run");
            return 0;
        }

        let status = Command::new(SHELL)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) => match status.code() {
                Some(code) => code,
                None => {
                    // Terminated by a signal.
                    warn!("activation command {command:?} was killed by a signal");
                    EXEC_FAILURE_STATUS
                }
            },
            Err(e) => {
                warn!("failed to spawn activation command {command:?}: {e}");
                EXEC_FAILURE_STATUS
            }
        }
    }
}
