//! Link states and per-device status lines.
//!
//! # The four link states
//!
//! ```text
//!            UP request              peer ISUP
//!   DOWN ─────────────► CONNECTING ───────────► UP
//!    ▲                      │                    │
//!    │   peer ISDOWN        │ last client gone   │ last client gone
//!    └──────────────── DISCONNECTING ◄───────────┘
//! ```
//!
//! `CONNECTING` and `DISCONNECTING` are *in-progress* states: the server has
//! run a life-cycle command and is waiting for a notification peer to confirm
//! the physical result, or for a timeout to force the issue.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The life-cycle state of one shared device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkStatus {
    /// The link is physically down and nobody is using it.
    #[default]
    Down,
    /// The link is up and carrying traffic for at least one client.
    Up,
    /// The up command has run; waiting for confirmation.
    Connecting,
    /// The down command has run; waiting for confirmation.
    Disconnecting,
}

impl LinkStatus {
    /// Wire keyword for this state, as used in status lines.
    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Down => "DOWN",
            LinkStatus::Up => "UP",
            LinkStatus::Connecting => "CONNECTING",
            LinkStatus::Disconnecting => "DISCONNECTING",
        }
    }

    /// Returns `true` for the states in which clients may hold the device.
    pub fn is_active(self) -> bool {
        matches!(self, LinkStatus::Connecting | LinkStatus::Up)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a status line says about a device.
///
/// Only `Up` carries parameters: the number of whole seconds since the link
/// came up and the number of clients currently using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusReport {
    Down,
    Up { seconds_up: u64, clients: usize },
    Connecting,
    Disconnecting,
}

impl StatusReport {
    /// The bare link state this report describes.
    pub fn status(&self) -> LinkStatus {
        match self {
            StatusReport::Down => LinkStatus::Down,
            StatusReport::Up { .. } => LinkStatus::Up,
            StatusReport::Connecting => LinkStatus::Connecting,
            StatusReport::Disconnecting => LinkStatus::Disconnecting,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReport::Up {
                seconds_up,
                clients,
            } => write!(f, "UP {seconds_up} {clients}"),
            other => f.write_str(other.status().as_str()),
        }
    }
}

/// `<name>\t<status>`: one device's entry in a status reply or broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusLine {
    pub name: String,
    pub report: StatusReport,
}

impl fmt::Display for DeviceStatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.name, self.report)
    }
}

/// `<name>\t<description>`: one device's entry in the catalog reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceListing {
    pub name: String,
    pub description: String,
}

impl fmt::Display for DeviceListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.name, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_link_status_is_down() {
        assert_eq!(LinkStatus::default(), LinkStatus::Down);
    }

    #[test]
    fn test_only_connecting_and_up_are_active() {
        assert!(LinkStatus::Connecting.is_active());
        assert!(LinkStatus::Up.is_active());
        assert!(!LinkStatus::Down.is_active());
        assert!(!LinkStatus::Disconnecting.is_active());
    }

    #[test]
    fn test_up_report_renders_uptime_and_client_count() {
        // Arrange
        let line = DeviceStatusLine {
            name: "modem1".to_string(),
            report: StatusReport::Up {
                seconds_up: 93,
                clients: 2,
            },
        };

        // Act / Assert
        assert_eq!(line.to_string(), "modem1\tUP 93 2");
    }

    #[test]
    fn test_parameterless_reports_render_keyword_only() {
        assert_eq!(StatusReport::Down.to_string(), "DOWN");
        assert_eq!(StatusReport::Connecting.to_string(), "CONNECTING");
        assert_eq!(StatusReport::Disconnecting.to_string(), "DISCONNECTING");
    }

    #[test]
    fn test_listing_renders_name_tab_description() {
        let listing = DeviceListing {
            name: "isdn0".to_string(),
            description: "ISDN to head office".to_string(),
        };
        assert_eq!(listing.to_string(), "isdn0\tISDN to head office");
    }
}
