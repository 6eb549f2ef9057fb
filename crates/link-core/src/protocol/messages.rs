//! All link-server protocol message types.
//!
//! Every message is a single UDP datagram of ASCII text.  The first word
//! names the sender class and the second word the command:
//!
//! ```text
//! CLIENT UP modem1                      client  → server
//! NOTIFY ISUP modem1                    peer    → server
//! SERVER STATUS modem1\tUP 12 1         server  → client
//! BROADCAST STATUS modem1\tDOWN\n...    server  → multicast group
//! ```
//!
//! Fields inside a payload are separated by tabs and records by newlines,
//! so device names and descriptions must not contain either.

use serde::{Deserialize, Serialize};

use crate::domain::status::{DeviceListing, DeviceStatusLine};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Prefix of every client request.
pub const CLIENT_PREFIX: &str = "CLIENT ";
/// Prefix of every notification-peer message.
pub const NOTIFY_PREFIX: &str = "NOTIFY ";
/// Prefix of every unicast server reply.
pub const SERVER_PREFIX: &str = "SERVER ";
/// Prefix of every multicast announcement.
pub const BROADCAST_PREFIX: &str = "BROADCAST ";

/// Largest datagram either side is expected to send.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Field separator inside a record.
pub const FIELD_SEPARATOR: char = '\t';
/// Record separator inside a multi-record payload.
pub const RECORD_SEPARATOR: char = '\n';

// ── Inbound (to the server) ───────────────────────────────────────────────────

/// A request from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientCommand {
    /// Liveness refresh only.
    Ping,
    /// Request the device catalog.
    Devices,
    /// Ask for the named device to be brought up.
    Up(String),
    /// Release the named device.
    Down(String),
    /// Tear the named device down regardless of who is using it.
    ForceDown(String),
    /// Request the status line of one device.
    Status(String),
    /// Request the list of devices this client is connected to.
    ClientStatus,
}

impl ClientCommand {
    /// Wire keyword following the `CLIENT ` prefix.
    pub fn keyword(&self) -> &'static str {
        match self {
            ClientCommand::Ping => "PING",
            ClientCommand::Devices => "DEVICES",
            ClientCommand::Up(_) => "UP",
            ClientCommand::Down(_) => "DOWN",
            ClientCommand::ForceDown(_) => "FORCE_DOWN",
            ClientCommand::Status(_) => "STATUS",
            ClientCommand::ClientStatus => "CLIENT_STATUS",
        }
    }

    /// The device the command refers to, if any.
    pub fn device(&self) -> Option<&str> {
        match self {
            ClientCommand::Up(name)
            | ClientCommand::Down(name)
            | ClientCommand::ForceDown(name)
            | ClientCommand::Status(name) => Some(name),
            ClientCommand::Ping | ClientCommand::Devices | ClientCommand::ClientStatus => None,
        }
    }
}

/// Ground-truth link events reported by a notification peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerNotice {
    /// The named link is physically up.
    IsUp(String),
    /// The named link is physically down.
    IsDown(String),
}

impl PeerNotice {
    /// Wire keyword following the `NOTIFY ` prefix.
    pub fn keyword(&self) -> &'static str {
        match self {
            PeerNotice::IsUp(_) => "ISUP",
            PeerNotice::IsDown(_) => "ISDOWN",
        }
    }

    /// The device the notice refers to.
    pub fn device(&self) -> &str {
        match self {
            PeerNotice::IsUp(name) | PeerNotice::IsDown(name) => name,
        }
    }
}

/// Any datagram the server accepts, classified by sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inbound {
    Client(ClientCommand),
    Peer(PeerNotice),
}

// ── Outbound (from the server) ────────────────────────────────────────────────

/// A unicast reply sent back to the requesting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerReply {
    /// `SERVER DEVICES <name>\t<desc>\n...` in configuration order.
    Devices(Vec<DeviceListing>),
    /// `SERVER STATUS <name>\t<statusline>`.
    Status(DeviceStatusLine),
    /// `SERVER CLIENT_STATUS <name>\t<name>...`.
    ClientStatus(Vec<String>),
}

/// A multicast announcement sent to every listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Broadcast {
    /// The server (re)started; listeners forget any prior state.
    Init,
    /// Periodic aggregate status of every device.
    Status(Vec<DeviceStatusLine>),
    /// The server is shutting down.
    Quit,
}
