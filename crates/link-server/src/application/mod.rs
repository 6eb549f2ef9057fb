//! Application layer of the link server.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure link-status and protocol types in `link_core`) and the infrastructure
//! (UDP sockets, child processes, the configuration file).
//!
//! Components in this layer:
//!
//! - **Orchestrate** the registry and the link state machine to serve one
//!   client request or one timer tick.
//! - **Depend on abstractions** ([`link_state::LinkActivator`],
//!   [`status_broadcast::DatagramSink`]) rather than concrete implementations,
//!   so tests can run without spawning processes or opening sockets.
//! - **Contain no OS calls, no network I/O, no file system access**.
//!
//! # Sub-modules
//!
//! - **`registry`** – In-memory devices, clients and the edges between them.
//! - **`link_state`** – The DOWN / CONNECTING / UP / DISCONNECTING machine and
//!   the activator trait that runs life-cycle commands.
//! - **`relationships`** – Connect/disconnect with first- and last-edge
//!   transitions.
//! - **`command_processor`** – Executes one `CLIENT` or `NOTIFY` message.
//! - **`status_broadcast`** – `BROADCAST` announcements to the multicast group.
//! - **`timeout_sweep`** – Evicts silent clients and retries stuck devices.
//! - **`broker`** – Owns all of the above and applies the error policy.

pub mod broker;
pub mod command_processor;
pub mod error;
pub mod link_state;
pub mod registry;
pub mod relationships;
pub mod status_broadcast;
pub mod timeout_sweep;

pub use broker::{Broker, BrokerSettings};
pub use error::{BrokerError, EntityKey};
