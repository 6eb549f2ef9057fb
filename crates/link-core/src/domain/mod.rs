//! Domain types shared by the server and its peers.
//!
//! This module contains pure data with no infrastructure dependencies: the
//! link state enum and the status line rendered for each device.  The state
//! machine that *moves* a device between states lives in the server crate;
//! here we only describe what a state is and how it is reported.

/// Link states and status-line rendering.
///
/// See [`status::LinkStatus`] for the main type.
pub mod status;
