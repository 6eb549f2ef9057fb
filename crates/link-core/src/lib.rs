//! # link-core
//!
//! Shared library for link-server containing the text wire protocol and the
//! link-status domain types.
//!
//! This crate is used by the server and by anything that talks to it (clients,
//! notification peers, test harnesses).  It has zero dependencies on OS APIs
//! or network sockets.
//!
//! # Architecture overview
//!
//! link-server lets many transient clients share a small set of named physical
//! links ("devices").  Clients ask for a device to be brought up or down; the
//! server runs the configured life-cycle commands and keeps the link up only
//! while somebody needs it.
//!
//! - **`protocol`** – How requests and replies travel over the network.  Every
//!   message is one UDP datagram of tab/newline-delimited text, prefixed with
//!   the sender class (`CLIENT `, `NOTIFY `, `SERVER `, `BROADCAST `).
//!
//! - **`domain`** – The four link states and the per-device status line that
//!   appears in replies and broadcasts.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `link_core::LinkStatus` instead of `link_core::domain::status::LinkStatus`.
pub use domain::status::{DeviceListing, DeviceStatusLine, LinkStatus, StatusReport};
pub use protocol::codec::{
    decode_broadcast, decode_inbound, decode_reply, encode_broadcast, encode_inbound,
    encode_reply, ProtocolError,
};
pub use protocol::messages::{Broadcast, ClientCommand, Inbound, PeerNotice, ServerReply};
