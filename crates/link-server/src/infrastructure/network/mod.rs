//! Network infrastructure for the link server.
//!
//! # Sub-modules
//!
//! - **`transport`** – The UDP socket shared by commands, replies and
//!   multicast broadcasts.  Implements the application's `DatagramSink`.
//!
//! - **`reactor`** – The single event loop that multiplexes the socket, the
//!   poll timer and the shutdown signal, and feeds everything to the broker.

pub mod reactor;
pub mod transport;
