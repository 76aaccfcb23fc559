//! Typed network and endpoint configuration.
//!
//! Options arrive as loosely typed JSON. Everything is parsed and validated
//! here, before any device is touched; a bad value comes back as an error
//! naming the offending key.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use base64::Engine;
use h3cbr_common::{NetError, NetResult, NetworkId};
use h3cbr_network::MacAddr;
use serde_json::Value;

use crate::api::Options;

/// Map holding driver-specific `-o key=value` options.
pub const GENERIC_DATA: &str = "com.docker.network.generic";
/// Enable IPv6 on the network.
pub const ENABLE_IPV6: &str = "com.docker.network.enable_ipv6";
/// Network without external connectivity.
pub const INTERNAL: &str = "com.docker.network.internal";
/// Inter-container communication.
pub const ENABLE_ICC: &str = "com.docker.network.bridge.enable_icc";
/// Default host IP for port bindings.
pub const DEFAULT_BINDING_IP: &str = "com.docker.network.bridge.host_binding_ipv4";
/// Prefix of the in-sandbox interface name.
pub const CONTAINER_IFACE_PREFIX: &str = "com.docker.network.container_iface_prefix";
/// Explicit endpoint MAC address.
pub const MAC_ADDRESS: &str = "com.docker.network.endpoint.macaddress";

/// Bridge device name.
pub const BRIDGE_NAME_OPTION: &str = "net.bridge.bridge.name";
/// MTU of the endpoints' veth pairs.
pub const MTU_OPTION: &str = "net.bridge.bridge.mtu";
/// `nat` or `flat`.
pub const MODE_OPTION: &str = "net.bridge.bridge.mode";
/// Host interface the network binds to.
pub const BIND_INTERFACE_OPTION: &str = "net.bridge.bridge.bind_interface";

/// Label space reserved for this driver.
pub const LABEL_PREFIX: &str = "com.h3c.network";
/// Requested container-side interface name.
pub const CHANNEL_TYPE: &str = "com.h3c.network.channelType";

/// Prefix of derived bridge names.
pub const BRIDGE_PREFIX: &str = "h3cbr-";
/// Number of network id characters in a derived bridge name.
pub const BRIDGE_ID_LEN: usize = 5;
/// MTU assumed when none is configured.
pub const DEFAULT_MTU: u32 = 1500;
/// Lower bound of the IPv4 MTU (RFC 791).
pub const MIN_MTU: u32 = 68;
/// Upper bound accepted for jumbo frames.
pub const MAX_MTU: u32 = 65535;
/// In-sandbox interface prefix when none is configured.
pub const DEFAULT_CONTAINER_IFACE_PREFIX: &str = "eth";

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_IFNAME_LEN: usize = 15;

/// Forwarding mode of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// Masquerade outbound traffic.
    #[default]
    Nat,
    /// Route container addresses as-is.
    Flat,
}

impl NetworkMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Nat => "nat",
            Self::Flat => "flat",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nat" => Ok(Self::Nat),
            "flat" => Ok(Self::Flat),
            other => Err(NetError::invalid_option(
                MODE_OPTION,
                format!("unknown mode {other:?}, expected nat or flat"),
            )),
        }
    }
}

/// Per-network configuration, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfiguration {
    /// Bridge device name; never empty.
    pub bridge_name: String,
    /// MTU applied to endpoint veth pairs.
    pub mtu: u32,
    /// IPv6 enabled.
    pub enable_ipv6: bool,
    /// Inter-container communication allowed.
    pub enable_icc: bool,
    /// Outbound traffic masqueraded (`nat` mode).
    pub enable_ip_masquerade: bool,
    /// No external connectivity.
    pub internal: bool,
    /// Default host IP for port bindings.
    pub default_binding_ip: IpAddr,
    /// Prefix of the in-sandbox interface name.
    pub container_iface_prefix: String,
    /// Forwarding mode.
    pub mode: NetworkMode,
    /// Host interface the network binds to.
    pub bind_interface: Option<String>,
}

impl NetworkConfiguration {
    /// Bridge name derived from a network id: `h3cbr-` + first five characters.
    #[must_use]
    pub fn default_bridge_name(id: &NetworkId) -> String {
        format!("{BRIDGE_PREFIX}{}", id.truncated(BRIDGE_ID_LEN))
    }

    /// Parse the options of a create-network request.
    ///
    /// Driver options are read from the generic map first and from the top
    /// level second.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidOption`] naming the first bad key.
    pub fn parse(id: &NetworkId, options: &Options) -> NetResult<Self> {
        let generic = match options.get(GENERIC_DATA) {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(NetError::invalid_option(GENERIC_DATA, "expected an object"));
            }
        };
        let lookup = |key: &'static str| -> Option<&Value> {
            generic
                .and_then(|map| map.get(key))
                .or_else(|| options.get(key))
                .filter(|v| !v.is_null())
        };

        let bridge_name = match lookup(BRIDGE_NAME_OPTION) {
            Some(v) => {
                let name = as_string(BRIDGE_NAME_OPTION, v)?;
                validate_ifname(BRIDGE_NAME_OPTION, &name)?;
                name
            }
            None => Self::default_bridge_name(id),
        };

        let mtu = match lookup(MTU_OPTION) {
            Some(v) => {
                let mtu = as_u32(MTU_OPTION, v)?;
                if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
                    return Err(NetError::invalid_option(
                        MTU_OPTION,
                        format!("{mtu} is outside {MIN_MTU}..={MAX_MTU}"),
                    ));
                }
                mtu
            }
            None => DEFAULT_MTU,
        };

        let mode = match lookup(MODE_OPTION) {
            Some(v) => as_string(MODE_OPTION, v)?.parse()?,
            None => NetworkMode::default(),
        };

        let bind_interface = match lookup(BIND_INTERFACE_OPTION) {
            Some(v) => {
                let name = as_string(BIND_INTERFACE_OPTION, v)?;
                validate_ifname(BIND_INTERFACE_OPTION, &name)?;
                Some(name)
            }
            None => None,
        };

        let default_binding_ip = match lookup(DEFAULT_BINDING_IP) {
            Some(v) => as_string(DEFAULT_BINDING_IP, v)?.parse().map_err(|_| {
                NetError::invalid_option(DEFAULT_BINDING_IP, "expected an IP address")
            })?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let container_iface_prefix = match lookup(CONTAINER_IFACE_PREFIX) {
            Some(v) => {
                let prefix = as_string(CONTAINER_IFACE_PREFIX, v)?;
                validate_ifname(CONTAINER_IFACE_PREFIX, &prefix)?;
                prefix
            }
            None => DEFAULT_CONTAINER_IFACE_PREFIX.to_string(),
        };

        Ok(Self {
            bridge_name,
            mtu,
            enable_ipv6: lookup(ENABLE_IPV6)
                .map(|v| as_bool(ENABLE_IPV6, v))
                .transpose()?
                .unwrap_or(false),
            enable_icc: lookup(ENABLE_ICC)
                .map(|v| as_bool(ENABLE_ICC, v))
                .transpose()?
                .unwrap_or(true),
            enable_ip_masquerade: mode == NetworkMode::Nat,
            internal: lookup(INTERNAL)
                .map(|v| as_bool(INTERNAL, v))
                .transpose()?
                .unwrap_or(false),
            default_binding_ip,
            container_iface_prefix,
            mode,
            bind_interface,
        })
    }

    /// Whether endpoints need an explicit MTU.
    #[must_use]
    pub fn has_custom_mtu(&self) -> bool {
        self.mtu != DEFAULT_MTU
    }
}

/// User-specified endpoint configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfiguration {
    /// Explicit MAC address.
    pub mac_address: Option<MacAddr>,
    /// Requested container-side interface name.
    pub container_ifname: Option<String>,
}

impl EndpointConfiguration {
    /// Parse the options of a create-endpoint request.
    ///
    /// The MAC may be given as `aa:bb:cc:dd:ee:ff` or as the base64 encoding
    /// of its six bytes.
    ///
    /// # Errors
    ///
    /// [`NetError::InvalidEndpointConfig`] when an option has the wrong shape.
    pub fn parse(options: &Options) -> NetResult<Self> {
        let invalid = |field: &str| NetError::InvalidEndpointConfig {
            field: field.to_string(),
        };

        let mac_address = match options.get(MAC_ADDRESS) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(parse_mac(s).ok_or_else(|| invalid(MAC_ADDRESS))?),
            Some(_) => return Err(invalid(MAC_ADDRESS)),
        };

        let container_ifname = match options.get(CHANNEL_TYPE) {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => {
                validate_ifname(CHANNEL_TYPE, name).map_err(|_| invalid(CHANNEL_TYPE))?;
                Some(name.clone())
            }
            Some(_) => return Err(invalid(CHANNEL_TYPE)),
        };

        Ok(Self {
            mac_address,
            container_ifname,
        })
    }
}

fn parse_mac(s: &str) -> Option<MacAddr> {
    if let Ok(mac) = s.parse() {
        return Some(mac);
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
    let octets: [u8; 6] = bytes.try_into().ok()?;
    Some(MacAddr::new(octets))
}

fn validate_ifname(field: &str, name: &str) -> NetResult<()> {
    if name.is_empty() || name.len() > MAX_IFNAME_LEN {
        return Err(NetError::invalid_option(
            field,
            format!("interface names must be 1-{MAX_IFNAME_LEN} characters"),
        ));
    }
    if name.contains(['/', ' ', ':']) || name == "." || name == ".." {
        return Err(NetError::invalid_option(
            field,
            format!("{name:?} is not a valid interface name"),
        ));
    }
    Ok(())
}

fn as_string(field: &str, value: &Value) -> NetResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(NetError::invalid_option(field, "expected a string")),
    }
}

fn as_bool(field: &str, value: &Value) -> NetResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => s
            .parse()
            .map_err(|_| NetError::invalid_option(field, format!("{s:?} is not a boolean"))),
        _ => Err(NetError::invalid_option(field, "expected a boolean")),
    }
}

fn as_u32(field: &str, value: &Value) -> NetResult<u32> {
    let invalid = || NetError::invalid_option(field, format!("{value} is not a valid number"));
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(invalid),
        Value::String(s) => s.trim().parse().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h3cbr_common::ErrorKind;
    use serde_json::json;

    fn options(value: Value) -> Options {
        serde_json::from_value(value).unwrap()
    }

    fn id() -> NetworkId {
        NetworkId::new("abc123def4567890").unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = NetworkConfiguration::parse(&id(), &Options::new()).unwrap();
        assert_eq!(config.bridge_name, "h3cbr-abc12");
        assert_eq!(config.mtu, DEFAULT_MTU);
        assert_eq!(config.mode, NetworkMode::Nat);
        assert!(config.enable_ip_masquerade);
        assert!(config.enable_icc);
        assert!(!config.enable_ipv6);
        assert!(!config.internal);
        assert_eq!(config.container_iface_prefix, "eth");
        assert_eq!(config.default_binding_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(!config.has_custom_mtu());
    }

    #[test]
    fn test_short_id_uses_whole_id() {
        let id = NetworkId::new("ab").unwrap();
        assert_eq!(NetworkConfiguration::default_bridge_name(&id), "h3cbr-ab");
    }

    #[test]
    fn test_generic_options() {
        let opts = options(json!({
            GENERIC_DATA: {
                BRIDGE_NAME_OPTION: "br-custom",
                MTU_OPTION: "1450",
                MODE_OPTION: "flat",
                BIND_INTERFACE_OPTION: "eth1",
            },
            ENABLE_IPV6: true,
            INTERNAL: "true",
        }));
        let config = NetworkConfiguration::parse(&id(), &opts).unwrap();
        assert_eq!(config.bridge_name, "br-custom");
        assert_eq!(config.mtu, 1450);
        assert_eq!(config.mode, NetworkMode::Flat);
        assert!(!config.enable_ip_masquerade);
        assert_eq!(config.bind_interface.as_deref(), Some("eth1"));
        assert!(config.enable_ipv6);
        assert!(config.internal);
        assert!(config.has_custom_mtu());
    }

    #[test]
    fn test_numeric_mtu() {
        let opts = options(json!({ GENERIC_DATA: { MTU_OPTION: 9000 } }));
        let config = NetworkConfiguration::parse(&id(), &opts).unwrap();
        assert_eq!(config.mtu, 9000);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            json!({ GENERIC_DATA: { MTU_OPTION: "big" } }),
            json!({ GENERIC_DATA: { MTU_OPTION: "20" } }),
            json!({ GENERIC_DATA: { MODE_OPTION: "macvlan" } }),
            json!({ GENERIC_DATA: { BRIDGE_NAME_OPTION: "" } }),
            json!({ GENERIC_DATA: { BRIDGE_NAME_OPTION: "a-name-way-too-long" } }),
            json!({ GENERIC_DATA: { BRIDGE_NAME_OPTION: ["br0"] } }),
            json!({ GENERIC_DATA: "not-a-map" }),
            json!({ ENABLE_IPV6: "maybe" }),
            json!({ DEFAULT_BINDING_IP: "not-an-ip" }),
        ];
        for case in cases {
            let err = NetworkConfiguration::parse(&id(), &options(case.clone())).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "{case}");
        }
    }

    #[test]
    fn test_error_names_the_field() {
        let opts = options(json!({ GENERIC_DATA: { MTU_OPTION: "big" } }));
        let err = NetworkConfiguration::parse(&id(), &opts).unwrap_err();
        assert!(matches!(err, NetError::InvalidOption { ref field, .. } if field == MTU_OPTION));
    }

    #[test]
    fn test_endpoint_mac_forms() {
        let colon = options(json!({ MAC_ADDRESS: "02:42:ac:11:00:09" }));
        let base64 = options(json!({ MAC_ADDRESS: "AkKsEQAJ" }));
        let expected = Some(MacAddr::new([0x02, 0x42, 0xac, 0x11, 0x00, 0x09]));
        assert_eq!(EndpointConfiguration::parse(&colon).unwrap().mac_address, expected);
        assert_eq!(EndpointConfiguration::parse(&base64).unwrap().mac_address, expected);
    }

    #[test]
    fn test_endpoint_rejects_wrong_shapes() {
        for case in [
            json!({ MAC_ADDRESS: 42 }),
            json!({ MAC_ADDRESS: "not-a-mac" }),
            json!({ MAC_ADDRESS: [2, 66, 172, 17, 0, 9] }),
            json!({ CHANNEL_TYPE: 7 }),
            json!({ CHANNEL_TYPE: "an-overly-long-ifname" }),
        ] {
            let err = EndpointConfiguration::parse(&options(case.clone())).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidEndpointConfig, "{case}");
        }
    }

    #[test]
    fn test_endpoint_channel_type() {
        let opts = options(json!({ CHANNEL_TYPE: "eth5" }));
        let config = EndpointConfiguration::parse(&opts).unwrap();
        assert_eq!(config.container_ifname.as_deref(), Some("eth5"));
        assert!(config.mac_address.is_none());
    }
}
