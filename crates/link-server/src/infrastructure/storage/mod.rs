//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module handles:
//!
//! - Reading the TOML configuration file named on the command line.
//! - Providing sensible defaults when the file does not exist.
//! - Validating device names and addresses before anything is bound.

pub mod config;
