//! In-memory driver state: the network registry and per-network endpoint tables.
//!
//! Two mutexes are involved and they nest in one direction only. The
//! registry lock guards the id → network map; each [`Network`] guards its own
//! endpoint table. Code holding a network lock must never take the registry
//! lock. Neither lock is held across an `.await`, so device I/O always runs
//! unlocked.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use h3cbr_common::{EndpointId, NetError, NetResult, NetworkId};
use h3cbr_network::{BridgeInterface, MacAddr};
use ipnet::IpNet;
use parking_lot::Mutex;

use crate::config::{EndpointConfiguration, NetworkConfiguration};

/// A provisioned endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Endpoint identifier.
    pub id: EndpointId,
    /// Owning network.
    pub network_id: NetworkId,
    /// Host-side veth name, attached to the bridge.
    pub host_ifname: String,
    /// Container-side veth name, moved into the sandbox on join.
    pub container_ifname: String,
    /// MAC applied to the container side, if one was elected.
    pub mac_address: Option<MacAddr>,
    /// IPv4 address with prefix length.
    pub address: Option<IpNet>,
    /// IPv6 address with prefix length.
    pub address_ipv6: Option<IpNet>,
    /// User-specified configuration.
    pub config: EndpointConfiguration,
}

/// Proof of one particular reservation.
///
/// An id can be released and reserved again while a slow request still
/// provisions under the old claim; the token tells the two claims apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation(u64);

/// Slot in an endpoint table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEntry {
    /// Id claimed, devices not yet provisioned.
    Reserved(Reservation),
    /// Provisioning finished.
    Provisioned(Endpoint),
}

#[derive(Debug, Default)]
struct EndpointTable {
    entries: HashMap<EndpointId, EndpointEntry>,
    next_reservation: u64,
    closed: bool,
}

/// A network managed by this driver.
#[derive(Debug)]
pub struct Network {
    id: NetworkId,
    name: String,
    bridge: BridgeInterface,
    config: NetworkConfiguration,
    endpoints: Mutex<EndpointTable>,
}

impl Network {
    /// Build a network around an acquired bridge. Its name is the bridge name.
    #[must_use]
    pub fn new(id: NetworkId, config: NetworkConfiguration, bridge: BridgeInterface) -> Self {
        Self {
            id,
            name: bridge.name().to_string(),
            bridge,
            config,
            endpoints: Mutex::new(EndpointTable::default()),
        }
    }

    /// Network identifier.
    #[must_use]
    pub fn id(&self) -> &NetworkId {
        &self.id
    }

    /// Human readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The network's bridge.
    #[must_use]
    pub fn bridge(&self) -> &BridgeInterface {
        &self.bridge
    }

    /// Parsed network options.
    #[must_use]
    pub fn config(&self) -> &NetworkConfiguration {
        &self.config
    }

    /// IPv4 gateway handed over by IPAM.
    #[must_use]
    pub fn gateway_ipv4(&self) -> Option<IpAddr> {
        self.bridge.gateway_ipv4.map(IpAddr::V4)
    }

    /// IPv6 gateway handed over by IPAM.
    #[must_use]
    pub fn gateway_ipv6(&self) -> Option<IpAddr> {
        self.bridge.gateway_ipv6.map(IpAddr::V6)
    }

    /// Claim `id` before any device is created for it.
    ///
    /// # Errors
    ///
    /// [`NetError::Conflict`] when the id is already present or the network
    /// is being deleted.
    pub fn reserve_endpoint(&self, id: &EndpointId) -> NetResult<Reservation> {
        let mut table = self.endpoints.lock();
        if table.closed {
            return Err(NetError::conflict(format!(
                "network {} is being deleted",
                self.id
            )));
        }
        if table.entries.contains_key(id) {
            return Err(NetError::conflict(format!(
                "endpoint {id} already exists in network {}",
                self.id
            )));
        }
        table.next_reservation += 1;
        let reservation = Reservation(table.next_reservation);
        table
            .entries
            .insert(id.clone(), EndpointEntry::Reserved(reservation));
        Ok(reservation)
    }

    /// Replace a reservation with the provisioned endpoint.
    ///
    /// # Errors
    ///
    /// [`NetError::Conflict`] when `reservation` no longer holds the slot.
    pub fn commit_endpoint(&self, reservation: Reservation, endpoint: Endpoint) -> NetResult<()> {
        let mut table = self.endpoints.lock();
        match table.entries.get_mut(&endpoint.id) {
            Some(slot) if *slot == EndpointEntry::Reserved(reservation) => {
                *slot = EndpointEntry::Provisioned(endpoint);
                Ok(())
            }
            _ => Err(NetError::conflict(format!(
                "endpoint {} is no longer reserved in network {}",
                endpoint.id, self.id
            ))),
        }
    }

    /// Look up an endpoint entry.
    #[must_use]
    pub fn get_endpoint(&self, id: &str) -> Option<EndpointEntry> {
        self.endpoints.lock().entries.get(id).cloned()
    }

    /// Look up a provisioned endpoint.
    ///
    /// # Errors
    ///
    /// [`NetError::EndpointNotFound`] when the id is unknown or still reserved.
    pub fn provisioned_endpoint(&self, id: &str) -> NetResult<Endpoint> {
        match self.get_endpoint(id) {
            Some(EndpointEntry::Provisioned(endpoint)) => Ok(endpoint),
            _ => Err(NetError::EndpointNotFound { id: id.to_string() }),
        }
    }

    /// Drop an entry, reserved or provisioned. Returns what was removed.
    pub fn remove_endpoint(&self, id: &str) -> Option<EndpointEntry> {
        self.endpoints.lock().entries.remove(id)
    }

    /// Drop the slot of `id` only while `reservation` still holds it.
    /// Returns whether anything was removed.
    pub fn release_endpoint(&self, id: &str, reservation: Reservation) -> bool {
        let mut table = self.endpoints.lock();
        if table.entries.get(id) == Some(&EndpointEntry::Reserved(reservation)) {
            table.entries.remove(id);
            true
        } else {
            false
        }
    }

    /// Number of entries, reservations included.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().entries.len()
    }

    /// Refuse further reservations if the table is empty.
    ///
    /// # Errors
    ///
    /// [`NetError::Conflict`] when endpoints remain.
    pub fn close(&self) -> NetResult<()> {
        let mut table = self.endpoints.lock();
        if !table.entries.is_empty() {
            return Err(NetError::conflict(format!(
                "network {} still has {} endpoint(s)",
                self.id,
                table.entries.len()
            )));
        }
        table.closed = true;
        Ok(())
    }
}

/// Registry of live networks.
///
/// Lock order: the registry lock is taken alone. Callers must not hold a
/// [`Network`] lock while calling into the registry.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    networks: Mutex<HashMap<NetworkId, Arc<Network>>>,
}

impl NetworkRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a network.
    ///
    /// # Errors
    ///
    /// [`NetError::BadRequest`] for an empty id, [`NetError::NetworkNotFound`]
    /// when absent.
    pub fn get(&self, id: &str) -> NetResult<Arc<Network>> {
        if id.is_empty() {
            return Err(NetError::bad_request("invalid network id: empty"));
        }
        self.networks
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| NetError::NetworkNotFound { id: id.to_string() })
    }

    /// Insert a network, replacing any entry with the same id.
    pub fn add(&self, network: Arc<Network>) {
        let previous = self.networks.lock().insert(network.id().clone(), network);
        if let Some(previous) = previous {
            tracing::warn!(network = %previous.id(), "Replaced existing network entry");
        }
    }

    /// Insert a network unless its id is taken. Returns the registered entry,
    /// which is the existing one when the id was taken.
    pub fn insert_if_absent(&self, network: Arc<Network>) -> Arc<Network> {
        Arc::clone(
            self.networks
                .lock()
                .entry(network.id().clone())
                .or_insert(network),
        )
    }

    /// Remove a network if present.
    pub fn remove(&self, id: &str) -> Option<Arc<Network>> {
        self.networks.lock().remove(id)
    }

    /// Snapshot of all networks.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Network>> {
        self.networks.lock().values().cloned().collect()
    }

    /// Number of networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.lock().len()
    }

    /// Whether no network is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.lock().is_empty()
    }
}
