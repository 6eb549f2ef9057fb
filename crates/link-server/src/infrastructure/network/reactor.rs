//! The reactor: the server's single event loop.
//!
//! Each iteration waits for whichever comes first of
//!
//! - a datagram on the command socket,
//! - the poll interval elapsing,
//! - the shutdown signal changing,
//!
//! and then, unless shutting down, runs the broker's periodic tick (status
//! broadcast followed by the timeout sweep).  A busy socket therefore also
//! means frequent broadcasts, but an idle one still produces one every poll
//! interval.
//!
//! # Shutdown
//!
//! The owner keeps the sending half of a `tokio::sync::watch` channel and sets
//! it to `true` (or drops it) to stop the loop.  The flag is checked at the top
//! of every iteration, so an in-flight command or tick always completes first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use link_core::protocol::MAX_DATAGRAM_SIZE;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::transport::{is_transient_recv_error, UdpTransport};
use crate::application::Broker;

/// Error type for the event loop.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Receiving on the command socket failed in a way that cannot be retried.
    #[error("receive on command socket failed: {0}")]
    Recv(#[source] std::io::Error),
}

/// Owns the broker and drives it from socket, timer and shutdown events.
pub struct Reactor {
    transport: Arc<UdpTransport>,
    broker: Broker,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Reactor {
    pub fn new(
        transport: Arc<UdpTransport>,
        broker: Broker,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            broker,
            poll_interval,
            shutdown,
        }
    }

    /// Runs until shutdown is signalled or the socket fails.
    ///
    /// `BROADCAST INIT` is sent before the first iteration and `BROADCAST QUIT`
    /// on the way out, both best effort.  The broker is handed back so the
    /// caller can inspect the final state.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::Recv`] on a fatal receive error.
    pub async fn run(mut self) -> Result<Broker, ReactorError> {
        if let Err(e) = self.broker.announce_init().await {
            warn!("could not announce startup: {e}");
        }

        let result = self.event_loop().await;

        if let Err(e) = self.broker.announce_quit().await {
            warn!("could not announce shutdown: {e}");
        }
        info!("reactor stopped");
        result.map(|()| self.broker)
    }

    async fn event_loop(&mut self) -> Result<(), ReactorError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            if *self.shutdown.borrow() {
                info!("shutdown requested");
                return Ok(());
            }

            tokio::select! {
                received = self.transport.recv_from(&mut buf) => match received {
                    Ok((len, sender)) => {
                        self.broker
                            .handle_datagram(sender, &buf[..len], Instant::now())
                            .await;
                    }
                    Err(e) if is_transient_recv_error(&e) => {
                        debug!("ignoring receive error: {e}");
                    }
                    Err(e) => {
                        error!("command socket receive failed: {e}");
                        return Err(ReactorError::Recv(e));
                    }
                },
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        info!("shutdown signal dropped");
                        return Ok(());
                    }
                    continue;
                }
            }

            self.broker.tick(Instant::now()).await;
        }
    }
}
