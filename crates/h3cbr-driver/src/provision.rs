//! Endpoint provisioning.
//!
//! An endpoint is a veth pair whose host side is enslaved to the network's
//! bridge. The endpoint id is reserved before any device exists; every
//! failure afterwards removes the reservation, and every failure after the
//! pair exists deletes its host side (which takes the peer with it).

use std::net::IpAddr;

use h3cbr_common::{EndpointId, NetError, NetResult};
use h3cbr_network::{
    MacAddr, VETH_LEN, VETH_PREFIX, VethPair, attach_to_bridge, generate_ifname, veth,
};
use ipnet::IpNet;

use crate::api::{CreateEndpointRequest, CreateEndpointResponse, EndpointInterface, EndpointRequest};
use crate::config::EndpointConfiguration;
use crate::driver::Driver;
use crate::state::{Endpoint, EndpointEntry, Network, Reservation};

/// Addressing requested by the orchestrator, validated.
#[derive(Debug, Default)]
struct RequestedInterface {
    address: Option<IpNet>,
    address_ipv6: Option<IpNet>,
    mac_address: Option<MacAddr>,
}

impl RequestedInterface {
    fn parse(interface: Option<&EndpointInterface>) -> NetResult<Self> {
        let Some(interface) = interface else {
            return Ok(Self::default());
        };
        let mac_address = if interface.mac_address.is_empty() {
            None
        } else {
            Some(
                interface
                    .mac_address
                    .parse()
                    .map_err(|_| NetError::InvalidEndpointConfig {
                        field: "Interface.MacAddress".to_string(),
                    })?,
            )
        };
        Ok(Self {
            address: parse_address("Interface.Address", &interface.address)?,
            address_ipv6: parse_address("Interface.AddressIPv6", &interface.address_ipv6)?,
            mac_address,
        })
    }

    fn ipv4(&self) -> Option<std::net::Ipv4Addr> {
        match self.address.map(|net| net.addr()) {
            Some(IpAddr::V4(ip)) => Some(ip),
            _ => None,
        }
    }
}

/// Accepts `a.b.c.d/nn` as well as a bare address.
fn parse_address(field: &str, value: &str) -> NetResult<Option<IpNet>> {
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(Some(net));
    }
    value
        .parse::<IpAddr>()
        .map(|ip| Some(IpNet::from(ip)))
        .map_err(|_| NetError::invalid_option(field, format!("{value:?} is not an address")))
}

/// Pick the MAC for an endpoint.
///
/// An explicit endpoint option wins, then a MAC supplied with the request,
/// then one derived from the IPv4 address. Without any of them the kernel
/// keeps its own.
#[must_use]
pub fn elect_mac_address(
    config: &EndpointConfiguration,
    requested: Option<MacAddr>,
    ipv4: Option<std::net::Ipv4Addr>,
) -> Option<MacAddr> {
    config
        .mac_address
        .or(requested)
        .or_else(|| ipv4.map(MacAddr::from_ipv4))
}

impl Driver {
    /// Create the devices of an endpoint and record it.
    ///
    /// # Errors
    ///
    /// Validation errors leave the table untouched. Device errors are
    /// returned after the endpoint is rolled back.
    pub async fn create_endpoint(
        &self,
        request: CreateEndpointRequest,
    ) -> NetResult<CreateEndpointResponse> {
        tracing::debug!(
            network = %request.network_id,
            endpoint = %request.endpoint_id,
            interface = ?request.interface,
            options = ?request.options,
            "Create endpoint request"
        );

        let network = self.networks.get(&request.network_id)?;
        let id = EndpointId::new(request.endpoint_id)?;
        let config = EndpointConfiguration::parse(&request.options)?;
        let requested = RequestedInterface::parse(request.interface.as_ref())?;
        let mac_address = elect_mac_address(&config, requested.mac_address, requested.ipv4());

        let reservation = network.reserve_endpoint(&id)?;

        let endpoint = Endpoint {
            id: id.clone(),
            network_id: network.id().clone(),
            host_ifname: String::new(),
            container_ifname: String::new(),
            mac_address,
            address: requested.address,
            address_ipv6: requested.address_ipv6,
            config,
        };

        let mut created = None;
        let endpoint = match self
            .provision(&network, reservation, endpoint, &mut created)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(err) => {
                tracing::debug!(endpoint = id.short(), error = %err, "Provisioning failed, rolling back");
                self.rollback(&network, &id, reservation, created.as_deref())
                    .await;
                return Err(err);
            }
        };

        tracing::info!(
            network = %network.id(),
            endpoint = id.short(),
            host = %endpoint.host_ifname,
            container = %endpoint.container_ifname,
            "Endpoint created"
        );

        let interface = request.interface.unwrap_or_default();
        let response = CreateEndpointResponse {
            interface: Some(EndpointInterface {
                address: interface.address,
                address_ipv6: String::new(),
                mac_address: mac_address.map(|mac| mac.to_string()).unwrap_or_default(),
            }),
        };
        tracing::debug!(?response, "Create endpoint response");
        Ok(response)
    }

    /// Drive the devices for a reserved endpoint. `created` holds the host
    /// link name as soon as the pair exists. The record is committed only
    /// once the host side is up.
    async fn provision(
        &self,
        network: &Network,
        reservation: Reservation,
        mut endpoint: Endpoint,
        created: &mut Option<String>,
    ) -> NetResult<Endpoint> {
        let gateway = self.gateway.as_ref();

        let host_name = generate_ifname(gateway, VETH_PREFIX, VETH_LEN).await?;
        let container_name = match &endpoint.config.container_ifname {
            Some(name) => name.clone(),
            None => generate_ifname(gateway, VETH_PREFIX, VETH_LEN).await?,
        };
        tracing::debug!(
            endpoint = endpoint.id.short(),
            host = %host_name,
            container = %container_name,
            "Generated interface names"
        );

        VethPair::create(gateway, &host_name, &container_name).await?;
        *created = Some(host_name.clone());

        let pair = VethPair::resolve(gateway, &host_name, &container_name).await?;

        let mtu = network.config().mtu;
        if network.config().has_custom_mtu() {
            gateway.set_mtu(&pair.host, mtu).await?;
            gateway.set_mtu(&pair.container, mtu).await?;
        }
        if let Some(mac) = endpoint.mac_address {
            gateway.set_mac(&pair.container, mac).await?;
        }

        attach_to_bridge(gateway, &pair.host, network.bridge().link()).await?;

        // up last, once everything else is configured
        gateway.set_up(&pair.host).await?;

        endpoint.host_ifname = host_name;
        endpoint.container_ifname = container_name;
        network.commit_endpoint(reservation, endpoint.clone())?;
        Ok(endpoint)
    }

    /// Undo a failed provisioning. Only this call's reservation is dropped:
    /// the id may have been released and claimed again meanwhile.
    async fn rollback(
        &self,
        network: &Network,
        id: &EndpointId,
        reservation: Reservation,
        host: Option<&str>,
    ) {
        if let Some(host) = host {
            if let Err(err) = veth::delete_by_name(self.gateway.as_ref(), host).await {
                tracing::warn!(
                    endpoint = id.short(),
                    host,
                    error = %err,
                    "Failed to delete veth pair during rollback"
                );
            }
        }
        if !network.release_endpoint(id.as_str(), reservation) {
            tracing::debug!(endpoint = id.short(), "Reservation already released");
        }
    }

    /// Forget an endpoint.
    ///
    /// Unknown networks and endpoints succeed. No device is touched: the
    /// veth pair goes away with the sandbox namespace.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature matches the other verbs.
    pub fn delete_endpoint(&self, request: &EndpointRequest) -> NetResult<()> {
        tracing::debug!(network = %request.network_id, endpoint = %request.endpoint_id, "Delete endpoint request");

        let Ok(network) = self.networks.get(&request.network_id) else {
            tracing::debug!(network = %request.network_id, "Delete endpoint on unknown network");
            return Ok(());
        };
        match network.remove_endpoint(&request.endpoint_id) {
            Some(EndpointEntry::Provisioned(endpoint)) => {
                tracing::info!(
                    network = %network.id(),
                    endpoint = endpoint.id.short(),
                    host = %endpoint.host_ifname,
                    "Endpoint deleted"
                );
            }
            Some(EndpointEntry::Reserved(_)) => {
                tracing::debug!(endpoint = %request.endpoint_id, "Dropped endpoint reservation");
            }
            None => {
                tracing::debug!(endpoint = %request.endpoint_id, "Delete endpoint on unknown endpoint");
            }
        }
        Ok(())
    }
}
