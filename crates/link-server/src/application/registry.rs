//! Registry: the server's in-memory database of devices, clients and the
//! relationship edges between them.
//!
//! Devices are loaded once from configuration and never removed.  Clients are
//! created the first time an address sends a `CLIENT` message and removed by
//! the timeout sweeper.
//!
//! # Edge storage
//!
//! A relationship edge ("client C is using device D") is stored twice: the
//! client's address in `device.connected_clients` and the device's name in
//! `client.connected_devices`.  Only the edge primitives in this module
//! ([`Registry::link`], [`Registry::unlink`], [`Registry::sever_device`],
//! [`Registry::remove_client`]) touch those sets, and every one of them updates
//! both halves, so the two views can never disagree.  *When* an edge is added
//! or removed is decided by [`super::relationships::RelationshipGraph`] and
//! [`super::link_state::LinkStateMachine`].
//!
//! # IndexMap choice
//!
//! Both registries are `IndexMap`s keyed by device name / client address:
//! O(1) lookup, and iteration in insertion order, so the device catalog and
//! status broadcasts list devices in configuration order.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use link_core::{DeviceListing, DeviceStatusLine, LinkStatus, StatusReport};

use super::error::{BrokerError, EntityKey};

/// Command tokens handed to the link activator for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationCommands {
    /// Brings the link up.
    pub up: String,
    /// Takes the link down gracefully.
    pub down: String,
    /// Kills the link unconditionally.
    pub force_down: String,
}

/// A shared physical link.
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    description: String,
    commands: ActivationCommands,
    status: LinkStatus,
    connect_time: Option<Instant>,
    retries_remaining: u32,
    connected_clients: IndexSet<SocketAddr>,
}

impl Device {
    /// Creates a device in the `DOWN` state with no clients.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        commands: ActivationCommands,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            commands,
            status: LinkStatus::Down,
            connect_time: None,
            retries_remaining: 0,
            connected_clients: IndexSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn commands(&self) -> &ActivationCommands {
        &self.commands
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    /// Start of the current `UP` period or in-progress transition.
    pub fn connect_time(&self) -> Option<Instant> {
        self.connect_time
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Addresses of the clients using this device, in connection order.
    pub fn connected_clients(&self) -> impl Iterator<Item = &SocketAddr> {
        self.connected_clients.iter()
    }

    pub fn client_count(&self) -> usize {
        self.connected_clients.len()
    }

    pub fn is_used_by(&self, client: &SocketAddr) -> bool {
        self.connected_clients.contains(client)
    }

    /// The catalog entry for this device.
    pub fn listing(&self) -> DeviceListing {
        DeviceListing {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    /// The status line for this device as of `now`.
    pub fn status_line(&self, now: Instant) -> DeviceStatusLine {
        let report = match self.status {
            LinkStatus::Down => StatusReport::Down,
            LinkStatus::Connecting => StatusReport::Connecting,
            LinkStatus::Disconnecting => StatusReport::Disconnecting,
            LinkStatus::Up => StatusReport::Up {
                seconds_up: self
                    .connect_time
                    .map(|since| now.saturating_duration_since(since).as_secs())
                    .unwrap_or(0),
                clients: self.connected_clients.len(),
            },
        };
        DeviceStatusLine {
            name: self.name.clone(),
            report,
        }
    }

    // Mutators reserved for the link state machine.

    pub(super) fn set_status(&mut self, status: LinkStatus) {
        self.status = status;
    }

    pub(super) fn stamp_connect_time(&mut self, at: Instant) {
        self.connect_time = Some(at);
    }

    pub(super) fn set_retries_remaining(&mut self, retries: u32) {
        self.retries_remaining = retries;
    }
}

/// A remote peer using one or more devices, identified by its UDP endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    address: SocketAddr,
    last_heard_from: Instant,
    connected_devices: IndexSet<String>,
}

impl Client {
    fn new(address: SocketAddr, now: Instant) -> Self {
        Self {
            address,
            last_heard_from: now,
            connected_devices: IndexSet::new(),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn last_heard_from(&self) -> Instant {
        self.last_heard_from
    }

    /// Names of the devices this client is using, in connection order.
    pub fn connected_devices(&self) -> impl Iterator<Item = &str> {
        self.connected_devices.iter().map(String::as_str)
    }

    pub fn is_using(&self, device: &str) -> bool {
        self.connected_devices.contains(device)
    }
}

/// In-memory registry of all devices and clients.
#[derive(Debug, Default)]
pub struct Registry {
    devices: IndexMap<String, Device>,
    clients: IndexMap<SocketAddr, Client>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    /// Registers a configured device.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AlreadyExists`] if a device with the same name is
    /// already registered.
    pub fn add_device(&mut self, device: Device) -> Result<(), BrokerError> {
        if self.devices.contains_key(device.name()) {
            return Err(BrokerError::AlreadyExists(EntityKey::Device(
                device.name().to_string(),
            )));
        }
        self.devices.insert(device.name().to_string(), device);
        Ok(())
    }

    /// Looks up a device by name.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if no such device is configured.
    pub fn find_device(&self, name: &str) -> Result<&Device, BrokerError> {
        self.devices
            .get(name)
            .ok_or_else(|| BrokerError::device_not_found(name))
    }

    pub(super) fn find_device_mut(&mut self, name: &str) -> Result<&mut Device, BrokerError> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| BrokerError::device_not_found(name))
    }

    /// All devices in configuration order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    // ── Clients ───────────────────────────────────────────────────────────────

    /// Registers a new client first heard from at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AlreadyExists`] if the address is already known.
    pub fn add_client(&mut self, address: SocketAddr, now: Instant) -> Result<(), BrokerError> {
        if self.clients.contains_key(&address) {
            return Err(BrokerError::AlreadyExists(EntityKey::Client(address)));
        }
        self.clients.insert(address, Client::new(address, now));
        Ok(())
    }

    /// Removes a client, scrubbing any edge that still refers to it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if the address is unknown.
    pub fn remove_client(&mut self, address: SocketAddr) -> Result<Client, BrokerError> {
        let client = self
            .clients
            .shift_remove(&address)
            .ok_or_else(|| BrokerError::client_not_found(address))?;
        for name in &client.connected_devices {
            if let Some(device) = self.devices.get_mut(name) {
                device.connected_clients.shift_remove(&address);
            }
        }
        Ok(client)
    }

    /// Looks up a client by address.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if the address is unknown.
    pub fn find_client(&self, address: SocketAddr) -> Result<&Client, BrokerError> {
        self.clients
            .get(&address)
            .ok_or_else(|| BrokerError::client_not_found(address))
    }

    /// Resolves the client for `address`, creating it on first sight, and
    /// refreshes its `last_heard_from`.  Returns `true` if it was created.
    pub fn touch_client(&mut self, address: SocketAddr, now: Instant) -> bool {
        match self.clients.get_mut(&address) {
            Some(client) => {
                client.last_heard_from = now;
                false
            }
            None => {
                self.clients.insert(address, Client::new(address, now));
                true
            }
        }
    }

    /// All clients in order of first contact.
    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ── Edge primitives ───────────────────────────────────────────────────────

    /// Returns `true` if `client` is using `device`.
    pub fn is_linked(&self, client: SocketAddr, device: &str) -> bool {
        self.clients
            .get(&client)
            .is_some_and(|c| c.connected_devices.contains(device))
    }

    /// Inserts the edge on both sides.  Returns `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if either end is unknown.
    pub(super) fn link(&mut self, client: SocketAddr, device: &str) -> Result<bool, BrokerError> {
        let dev = self
            .devices
            .get_mut(device)
            .ok_or_else(|| BrokerError::device_not_found(device))?;
        let cli = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| BrokerError::client_not_found(client))?;
        let inserted = cli.connected_devices.insert(device.to_string());
        dev.connected_clients.insert(client);
        Ok(inserted)
    }

    /// Removes the edge from both sides.  Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if either end is unknown.
    pub(super) fn unlink(&mut self, client: SocketAddr, device: &str) -> Result<bool, BrokerError> {
        let dev = self
            .devices
            .get_mut(device)
            .ok_or_else(|| BrokerError::device_not_found(device))?;
        let cli = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| BrokerError::client_not_found(client))?;
        let removed = cli.connected_devices.shift_remove(device);
        dev.connected_clients.shift_remove(&client);
        Ok(removed)
    }

    /// Removes every edge of `device` without any further bookkeeping.
    /// Returns the addresses that were cut off.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] if the device is unknown.
    pub(super) fn sever_device(&mut self, device: &str) -> Result<Vec<SocketAddr>, BrokerError> {
        let dev = self
            .devices
            .get_mut(device)
            .ok_or_else(|| BrokerError::device_not_found(device))?;
        let severed: Vec<SocketAddr> = dev.connected_clients.drain(..).collect();
        for addr in &severed {
            if let Some(client) = self.clients.get_mut(addr) {
                client.connected_devices.shift_remove(device);
            }
        }
        Ok(severed)
    }

    /// Checks that every edge is recorded on both sides.
    pub fn edges_are_symmetric(&self) -> bool {
        let device_side = self.devices.values().all(|d| {
            d.connected_clients.iter().all(|addr| {
                self.clients
                    .get(addr)
                    .is_some_and(|c| c.connected_devices.contains(d.name()))
            })
        });
        let client_side = self.clients.values().all(|c| {
            c.connected_devices.iter().all(|name| {
                self.devices
                    .get(name)
                    .is_some_and(|d| d.connected_clients.contains(&c.address))
            })
        });
        device_side && client_side
    }

    /// Renders both registries for debug logging.
    pub fn dump(&self, now: Instant) -> String {
        let mut out = String::from("devices:\n");
        for device in self.devices.values() {
            let clients: Vec<String> = device
                .connected_clients
                .iter()
                .map(ToString::to_string)
                .collect();
            let _ = writeln!(
                out,
                "  {}  retries={}  [{}]",
                device.status_line(now),
                device.retries_remaining,
                clients.join(", ")
            );
        }
        out.push_str("clients:\n");
        for client in self.clients.values() {
            let devices: Vec<&str> = client.connected_devices().collect();
            let _ = writeln!(
                out,
                "  {}  idle={}s  [{}]",
                client.address,
                now.saturating_duration_since(client.last_heard_from)
                    .as_secs(),
                devices.join(", ")
            );
        }
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
