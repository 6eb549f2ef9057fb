//! Infrastructure layer for the link server.
//!
//! Contains OS-facing adapters: the process-spawning link activator, the UDP
//! socket and event loop, and configuration file loading.
//!
//! **Dependency rule**: this layer may depend on `application` and `link_core`,
//! but MUST NOT be imported by the `application` or domain layers.

pub mod activator;
pub mod network;
pub mod storage;
