//! Request and response bodies of the libnetwork remote driver protocol.
//!
//! Field names follow the JSON the orchestrator sends (PascalCase, with a few
//! irregular `ID`/`IPv4` spellings).

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Loosely typed option map as sent by the orchestrator.
pub type Options = HashMap<String, Value>;

/// Go clients serialize nil maps and slices as `null`; read those as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Scope reported by [`CapabilitiesResponse`].
pub const LOCAL_SCOPE: &str = "local";

/// `Plugin.Activate` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Implemented plugin interfaces.
    pub implements: Vec<String>,
}

impl Default for ActivateResponse {
    fn default() -> Self {
        Self {
            implements: vec!["NetworkDriver".to_string()],
        }
    }
}

/// `NetworkDriver.GetCapabilities` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    /// Allocation scope.
    pub scope: String,
    /// Connectivity scope.
    pub connectivity_scope: String,
}

/// IPAM pool handed over with a network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamData {
    /// Address space the pool belongs to.
    #[serde(default)]
    pub address_space: String,
    /// Pool in CIDR form.
    #[serde(default)]
    pub pool: String,
    /// Gateway, usually in CIDR form (`172.20.0.1/16`).
    #[serde(default)]
    pub gateway: String,
    /// Auxiliary addresses reserved in the pool.
    #[serde(default, deserialize_with = "null_as_default")]
    pub aux_addresses: HashMap<String, String>,
}

/// `NetworkDriver.CreateNetwork` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateNetworkRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Generic and well-known options.
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Options,
    /// IPv4 pools.
    #[serde(rename = "IPv4Data", default, deserialize_with = "null_as_default")]
    pub ipv4_data: Vec<IpamData>,
    /// IPv6 pools.
    #[serde(rename = "IPv6Data", default, deserialize_with = "null_as_default")]
    pub ipv6_data: Vec<IpamData>,
}

/// `NetworkDriver.AllocateNetwork` request (global-scope drivers only).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocateNetworkRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Options.
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: HashMap<String, String>,
    /// IPv4 pools.
    #[serde(rename = "IPv4Data", default, deserialize_with = "null_as_default")]
    pub ipv4_data: Vec<IpamData>,
    /// IPv6 pools.
    #[serde(rename = "IPv6Data", default, deserialize_with = "null_as_default")]
    pub ipv6_data: Vec<IpamData>,
}

/// `NetworkDriver.AllocateNetwork` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocateNetworkResponse {
    /// Options to store with the network.
    pub options: HashMap<String, String>,
}

/// Request carrying only a network id (`DeleteNetwork`, `FreeNetwork`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

/// Endpoint addressing, as sent by the orchestrator and echoed back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointInterface {
    /// IPv4 address in CIDR form.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    /// IPv6 address in CIDR form.
    #[serde(rename = "AddressIPv6", default, skip_serializing_if = "String::is_empty")]
    pub address_ipv6: String,
    /// MAC address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

/// `NetworkDriver.CreateEndpoint` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Endpoint identifier.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Addressing chosen by IPAM.
    #[serde(default)]
    pub interface: Option<EndpointInterface>,
    /// Endpoint options.
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Options,
}

/// `NetworkDriver.CreateEndpoint` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointResponse {
    /// Final addressing.
    pub interface: Option<EndpointInterface>,
}

/// Request addressing one endpoint (`DeleteEndpoint`, `EndpointOperInfo`,
/// `Leave`, `RevokeExternalConnectivity`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Endpoint identifier.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

/// `NetworkDriver.EndpointOperInfo` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InfoResponse {
    /// Opaque key/value data shown by the orchestrator.
    pub value: HashMap<String, String>,
}

/// `NetworkDriver.Join` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Endpoint identifier.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Path of the sandbox network namespace.
    #[serde(default)]
    pub sandbox_key: String,
    /// Join options.
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Options,
}

/// Name of the interface the orchestrator moves into the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceName {
    /// Host-namespace name of the container-side link.
    pub src_name: String,
    /// Prefix for the in-sandbox name (`eth` gives `eth0`, `eth1`, ...).
    pub dst_prefix: String,
}

/// `NetworkDriver.Join` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    /// Interface to move.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<InterfaceName>,
    /// IPv4 gateway.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    /// IPv6 gateway.
    #[serde(rename = "GatewayIPv6", default, skip_serializing_if = "String::is_empty")]
    pub gateway_ipv6: String,
    /// Whether the orchestrator should skip its own gateway endpoint.
    #[serde(default)]
    pub disable_gateway_service: bool,
}

/// `NetworkDriver.ProgramExternalConnectivity` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProgramExternalConnectivityRequest {
    /// Network identifier.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Endpoint identifier.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Options (port bindings, exposed ports).
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Options,
}

/// `NetworkDriver.DiscoverNew` / `DiscoverDelete` notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryNotification {
    /// Discovery type.
    #[serde(default)]
    pub discovery_type: i64,
    /// Discovery payload.
    #[serde(default)]
    pub discovery_data: Value,
}

/// Error body understood by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message.
    #[serde(rename = "Err")]
    pub err: String,
}
