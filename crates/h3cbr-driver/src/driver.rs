//! The network driver: network lifecycle and the plugin verbs that do not
//! provision devices. Endpoint provisioning lives in [`crate::provision`].

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;

use h3cbr_common::{ErrorKind, NetError, NetResult, NetworkId};
use h3cbr_network::{BridgeInterface, BridgeOrigin, LinkGateway, bridge_mac_supported};
use ipnet::{Ipv4Net, Ipv6Net};
use parking_lot::Mutex;

use crate::api::{
    AllocateNetworkRequest, AllocateNetworkResponse, CapabilitiesResponse, CreateNetworkRequest,
    DiscoveryNotification, EndpointRequest, InfoResponse, InterfaceName, IpamData, JoinRequest,
    JoinResponse, LOCAL_SCOPE, NetworkRequest, ProgramExternalConnectivityRequest,
};
use crate::config::NetworkConfiguration;
use crate::state::{Network, NetworkRegistry};

/// Driver-wide settings.
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Assign a random MAC to bridges this driver creates. `None` probes the
    /// running kernel once at construction.
    pub assign_bridge_mac: Option<bool>,
}

/// Bridge network driver.
///
/// All device access goes through the shared [`LinkGateway`].
pub struct Driver {
    pub(crate) gateway: Arc<dyn LinkGateway>,
    pub(crate) networks: NetworkRegistry,
    /// Bridges this driver created whose setup failed before a network
    /// claimed them. A retried create resumes them as `Created`.
    unfinished_bridges: Mutex<HashSet<String>>,
    assign_bridge_mac: bool,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("networks", &self.networks)
            .field("unfinished_bridges", &self.unfinished_bridges)
            .field("assign_bridge_mac", &self.assign_bridge_mac)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Create a driver over `gateway`.
    pub fn new(gateway: Arc<dyn LinkGateway>, config: DriverConfig) -> Self {
        let assign_bridge_mac = config.assign_bridge_mac.unwrap_or_else(bridge_mac_supported);
        tracing::debug!(assign_bridge_mac, "Driver initialized");
        Self {
            gateway,
            networks: NetworkRegistry::new(),
            unfinished_bridges: Mutex::new(HashSet::new()),
            assign_bridge_mac,
        }
    }

    /// Local scope for both allocation and connectivity.
    #[must_use]
    pub fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            scope: LOCAL_SCOPE.to_string(),
            connectivity_scope: LOCAL_SCOPE.to_string(),
        }
    }

    /// Look up a registered network.
    ///
    /// # Errors
    ///
    /// See [`NetworkRegistry::get`].
    pub fn network(&self, id: &str) -> NetResult<Arc<Network>> {
        self.networks.get(id)
    }

    /// Snapshot of registered networks.
    #[must_use]
    pub fn networks(&self) -> Vec<Arc<Network>> {
        self.networks.list()
    }

    /// Parse the request, acquire the bridge and register the network.
    ///
    /// A repeated create for a registered id keeps the existing entry, and
    /// with it the endpoint table and bridge ownership.
    ///
    /// # Errors
    ///
    /// Validation errors before any device is touched; device errors from
    /// bridge acquisition afterwards. [`NetError::Conflict`] when the id is
    /// registered with another bridge.
    pub async fn create_network(&self, request: CreateNetworkRequest) -> NetResult<()> {
        tracing::debug!(network = %request.network_id, options = ?request.options, "Create network request");

        let id = NetworkId::new(request.network_id)?;
        let config = NetworkConfiguration::parse(&id, &request.options)?;
        let (ipv4, gateway_ipv4) = ipam_v4(request.ipv4_data.first())?;
        let (ipv6, gateway_ipv6) = if config.enable_ipv6 {
            ipam_v6(request.ipv6_data.first())?
        } else {
            (None, None)
        };

        if let Ok(existing) = self.networks.get(id.as_str()) {
            return confirm_registered(&existing, &config);
        }

        let bridge = self
            .acquire_bridge(&config.bridge_name)
            .await?
            .with_ipv4(ipv4, gateway_ipv4)
            .with_ipv6(ipv6, gateway_ipv6);
        let network = Arc::new(Network::new(id, config, bridge));

        let registered = self.networks.insert_if_absent(Arc::clone(&network));
        if !Arc::ptr_eq(&registered, &network) {
            return confirm_registered(&registered, network.config());
        }

        tracing::info!(
            network = %network.id(),
            bridge = network.bridge().name(),
            origin = ?network.bridge().origin(),
            mtu = network.config().mtu,
            mode = %network.config().mode,
            "Network created"
        );
        Ok(())
    }

    /// Find or create `name`. A bridge created here that fails its setup is
    /// remembered, so the orchestrator's retry still owns it.
    async fn acquire_bridge(&self, name: &str) -> NetResult<BridgeInterface> {
        let gateway = self.gateway.as_ref();
        let unfinished = self.unfinished_bridges.lock().contains(name);

        let bridge = match BridgeInterface::find(gateway, name).await? {
            Some(existing) if unfinished => {
                tracing::debug!(bridge = name, "Resuming setup of bridge created earlier");
                existing.with_origin(BridgeOrigin::Created)
            }
            Some(existing) => return Ok(existing),
            None => BridgeInterface::create(gateway, name).await?,
        };

        if let Err(err) = bridge.configure(gateway, self.assign_bridge_mac).await {
            self.unfinished_bridges.lock().insert(name.to_string());
            return Err(err);
        }
        self.unfinished_bridges.lock().remove(name);
        Ok(bridge)
    }

    /// Remove a network and, if this driver created it, its bridge.
    ///
    /// A failed bridge deletion is logged and the entry is removed anyway.
    ///
    /// # Errors
    ///
    /// [`NetError::BadRequest`] for an empty id, [`NetError::Conflict`]
    /// while endpoints remain. Unknown ids succeed: state does not survive a
    /// restart.
    pub async fn delete_network(&self, request: NetworkRequest) -> NetResult<()> {
        tracing::debug!(network = %request.network_id, "Delete network request");

        let network = match self.networks.get(&request.network_id) {
            Ok(network) => network,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(network = %request.network_id, "Delete network on unknown network");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        network.close()?;

        let bridge = network.bridge();
        if bridge.origin() == BridgeOrigin::Created {
            if let Err(err) = bridge.delete(self.gateway.as_ref()).await {
                tracing::warn!(
                    network = %network.id(),
                    bridge = bridge.name(),
                    error = %err,
                    "Failed to remove bridge interface on network delete"
                );
            }
        } else {
            tracing::debug!(bridge = bridge.name(), "Leaving pre-existing bridge in place");
        }

        self.networks.remove(network.id().as_str());
        tracing::info!(network = %network.id(), "Network deleted");
        Ok(())
    }

    /// Interface names and MAC of a provisioned endpoint.
    ///
    /// # Errors
    ///
    /// [`NetError::NetworkNotFound`] or [`NetError::EndpointNotFound`].
    pub fn endpoint_info(&self, request: &EndpointRequest) -> NetResult<InfoResponse> {
        tracing::debug!(network = %request.network_id, endpoint = %request.endpoint_id, "Endpoint info request");

        let endpoint = self
            .network(&request.network_id)?
            .provisioned_endpoint(&request.endpoint_id)?;

        let mut response = InfoResponse::default();
        response
            .value
            .insert("host_ifname".to_string(), endpoint.host_ifname);
        response
            .value
            .insert("container_ifname".to_string(), endpoint.container_ifname);
        if let Some(mac) = endpoint.mac_address {
            response
                .value
                .insert("mac_address".to_string(), mac.to_string());
        }
        Ok(response)
    }

    /// Tell the orchestrator which link to move into the sandbox.
    ///
    /// # Errors
    ///
    /// [`NetError::NetworkNotFound`] or [`NetError::EndpointNotFound`].
    pub fn join(&self, request: &JoinRequest) -> NetResult<JoinResponse> {
        tracing::debug!(
            network = %request.network_id,
            endpoint = %request.endpoint_id,
            sandbox = %request.sandbox_key,
            "Join request"
        );

        let network = self.network(&request.network_id)?;
        let endpoint = network.provisioned_endpoint(&request.endpoint_id)?;

        let response = JoinResponse {
            interface_name: Some(InterfaceName {
                src_name: endpoint.container_ifname,
                dst_prefix: network.config().container_iface_prefix.clone(),
            }),
            gateway: network
                .gateway_ipv4()
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            gateway_ipv6: network
                .gateway_ipv6()
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            disable_gateway_service: false,
        };
        tracing::debug!(?response, "Join response");
        Ok(response)
    }

    /// Nothing to undo: the sandbox owner tears down the namespace.
    pub fn leave(&self, request: &EndpointRequest) {
        tracing::debug!(network = %request.network_id, endpoint = %request.endpoint_id, "Leave request");
    }

    /// Unused by local-scope drivers.
    pub fn discover_new(&self, notification: &DiscoveryNotification) {
        tracing::debug!(kind = notification.discovery_type, "Discover new notification");
    }

    /// Unused by local-scope drivers.
    pub fn discover_delete(&self, notification: &DiscoveryNotification) {
        tracing::debug!(kind = notification.discovery_type, "Discover delete notification");
    }

    /// Global-scope only; returns no options.
    #[must_use]
    pub fn allocate_network(&self, request: &AllocateNetworkRequest) -> AllocateNetworkResponse {
        tracing::debug!(network = %request.network_id, "Allocate network request");
        AllocateNetworkResponse::default()
    }

    /// Global-scope only.
    pub fn free_network(&self, request: &NetworkRequest) {
        tracing::debug!(network = %request.network_id, "Free network request");
    }

    /// Port publishing is not handled by this driver.
    pub fn program_external_connectivity(&self, request: &ProgramExternalConnectivityRequest) {
        tracing::debug!(
            network = %request.network_id,
            endpoint = %request.endpoint_id,
            "Program external connectivity request"
        );
    }

    /// Port publishing is not handled by this driver.
    pub fn revoke_external_connectivity(&self, request: &EndpointRequest) {
        tracing::debug!(
            network = %request.network_id,
            endpoint = %request.endpoint_id,
            "Revoke external connectivity request"
        );
    }
}

fn ipam_v4(data: Option<&IpamData>) -> NetResult<(Option<Ipv4Net>, Option<Ipv4Addr>)> {
    let Some(data) = data else {
        return Ok((None, None));
    };
    Ok((
        parse_pool("IPv4Data.Pool", &data.pool)?,
        parse_gateway("IPv4Data.Gateway", &data.gateway)?,
    ))
}

fn ipam_v6(data: Option<&IpamData>) -> NetResult<(Option<Ipv6Net>, Option<Ipv6Addr>)> {
    let Some(data) = data else {
        return Ok((None, None));
    };
    Ok((
        parse_pool("IPv6Data.Pool", &data.pool)?,
        parse_gateway("IPv6Data.Gateway", &data.gateway)?,
    ))
}

fn parse_pool<N: FromStr>(field: &str, pool: &str) -> NetResult<Option<N>> {
    if pool.is_empty() {
        return Ok(None);
    }
    pool.parse()
        .map(Some)
        .map_err(|_| NetError::invalid_option(field, format!("{pool:?} is not a CIDR pool")))
}

/// Accept a repeated create when it names the bridge already bound.
fn confirm_registered(existing: &Network, config: &NetworkConfiguration) -> NetResult<()> {
    if existing.bridge().name() != config.bridge_name {
        return Err(NetError::conflict(format!(
            "network {} is already bound to bridge {}",
            existing.id(),
            existing.bridge().name()
        )));
    }
    tracing::info!(
        network = %existing.id(),
        bridge = existing.bridge().name(),
        endpoints = existing.endpoint_count(),
        "Network already registered"
    );
    Ok(())
}

/// Gateways arrive as `a.b.c.d/nn` or as a bare address.
fn parse_gateway<A: FromStr>(field: &str, gateway: &str) -> NetResult<Option<A>> {
    if gateway.is_empty() {
        return Ok(None);
    }
    let address = gateway.split_once('/').map_or(gateway, |(address, _)| address);
    address
        .parse()
        .map(Some)
        .map_err(|_| NetError::invalid_option(field, format!("{gateway:?} is not an address")))
}
