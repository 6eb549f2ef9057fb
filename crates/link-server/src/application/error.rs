//! Error taxonomy shared by every application-layer component.
//!
//! Each variant maps to one propagation rule:
//!
//! | Variant             | Raised by                          | Handling                         |
//! |---------------------|------------------------------------|----------------------------------|
//! | `NotFound`          | registry lookups                   | command dropped, no reply        |
//! | `AlreadyExists`     | registry inserts                   | benign on idempotent connect     |
//! | `InvalidTransition` | link state machine                 | operation aborted, state kept    |
//! | `Unsupported`       | command decoding                   | datagram dropped                 |
//! | `ActivationFailed`  | life-cycle command exited non-zero | operation aborted, state kept    |
//! | `Transport`         | socket send/receive                | logged on send, fatal on receive |

use std::net::SocketAddr;

use link_core::{LinkStatus, ProtocolError};
use thiserror::Error;

/// Key of the registry entry an error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKey {
    Device(String),
    Client(SocketAddr),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Device(name) => write!(f, "device {name:?}"),
            EntityKey::Client(addr) => write!(f, "client {addr}"),
        }
    }
}

/// Error type for broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{0} not found")]
    NotFound(EntityKey),

    #[error("{0} already exists")]
    AlreadyExists(EntityKey),

    #[error("device {device:?} cannot go from {from} to {to}")]
    InvalidTransition {
        device: String,
        from: LinkStatus,
        to: LinkStatus,
    },

    #[error("unsupported message: {0}")]
    Unsupported(#[from] ProtocolError),

    #[error("command {command:?} for device {device:?} exited with status {status}")]
    ActivationFailed {
        device: String,
        command: String,
        status: i32,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl BrokerError {
    /// Shorthand for a missing device.
    pub fn device_not_found(name: &str) -> Self {
        BrokerError::NotFound(EntityKey::Device(name.to_string()))
    }

    /// Shorthand for a missing client.
    pub fn client_not_found(addr: SocketAddr) -> Self {
        BrokerError::NotFound(EntityKey::Client(addr))
    }

    /// Returns `true` for lookup misses, which are dropped without a reply.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::NotFound(_))
    }
}
