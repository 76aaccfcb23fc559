//! Linux bridge management.
//!
//! This module binds a network to a host bridge device, adopting an existing
//! bridge or creating a new one.

use std::net::{Ipv4Addr, Ipv6Addr};

use h3cbr_common::{NetError, NetResult};
use ipnet::{Ipv4Net, Ipv6Net};

use crate::gateway::{Link, LinkGateway, require_link};
use crate::mac::MacAddr;

/// How the driver came to hold a bridge device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOrigin {
    /// Created by this driver; deleted with its network.
    Created,
    /// Already present on the host; left alone on network deletion.
    Existing,
}

/// Binding to one host bridge device.
#[derive(Debug, Clone)]
pub struct BridgeInterface {
    link: Link,
    origin: BridgeOrigin,
    /// Bridge IPv4 address, as handed out by IPAM.
    pub ipv4: Option<Ipv4Net>,
    /// Bridge IPv6 address, as handed out by IPAM.
    pub ipv6: Option<Ipv6Net>,
    /// IPv4 gateway for endpoints on this bridge.
    pub gateway_ipv4: Option<Ipv4Addr>,
    /// IPv6 gateway for endpoints on this bridge.
    pub gateway_ipv6: Option<Ipv6Addr>,
}

impl BridgeInterface {
    /// Find the bridge named `name`, or create it.
    ///
    /// An existing link of another kind is a configuration conflict and is
    /// never replaced. A freshly created bridge gets a random MAC when
    /// `assign_mac` is set, and is brought up. Neither step is rolled back on
    /// failure: a bridge without its MAC is still usable.
    ///
    /// # Errors
    ///
    /// [`NetError::NotABridge`] on a name collision, a link error when
    /// creation (netlink and ioctl) or configuration fails.
    pub async fn acquire(
        gateway: &dyn LinkGateway,
        name: &str,
        assign_mac: bool,
    ) -> NetResult<Self> {
        if let Some(existing) = Self::find(gateway, name).await? {
            return Ok(existing);
        }
        let bridge = Self::create(gateway, name).await?;
        bridge.configure(gateway, assign_mac).await?;
        Ok(bridge)
    }

    /// Bind an existing bridge named `name`.
    ///
    /// # Errors
    ///
    /// [`NetError::NotABridge`] when the name belongs to another kind of link.
    pub async fn find(gateway: &dyn LinkGateway, name: &str) -> NetResult<Option<Self>> {
        if name.is_empty() {
            return Err(NetError::bad_request("bridge name must not be empty"));
        }
        let Some(link) = gateway.link_by_name(name).await? else {
            return Ok(None);
        };
        if !link.is_bridge() {
            return Err(NetError::NotABridge { name: link.name });
        }
        tracing::debug!(bridge = name, index = link.index, "Using existing bridge");
        Ok(Some(Self::bind(link, BridgeOrigin::Existing)))
    }

    /// Create the bridge device, falling back to ioctl when netlink refuses.
    /// The device is left down; see [`BridgeInterface::configure`].
    ///
    /// # Errors
    ///
    /// The legacy error when both creation paths fail.
    pub async fn create(gateway: &dyn LinkGateway, name: &str) -> NetResult<Self> {
        if name.is_empty() {
            return Err(NetError::bad_request("bridge name must not be empty"));
        }
        tracing::debug!(bridge = name, "Did not find any interface, creating bridge");
        if let Err(err) = gateway.add_bridge(name).await {
            tracing::debug!(bridge = name, error = %err, "Failed to create bridge via netlink, trying ioctl");
            gateway.add_bridge_legacy(name).await?;
        }
        let link = require_link(gateway, name).await?;
        tracing::info!(bridge = name, index = link.index, "Bridge created successfully");
        Ok(Self::bind(link, BridgeOrigin::Created))
    }

    /// Give a created bridge its MAC, when `assign_mac` is set, and bring it up.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; the device is left in place.
    pub async fn configure(&self, gateway: &dyn LinkGateway, assign_mac: bool) -> NetResult<()> {
        if assign_mac {
            let mac = MacAddr::random();
            gateway.set_mac(&self.link, mac).await?;
            tracing::debug!(bridge = %self.link.name, %mac, "Set bridge MAC address");
        }
        gateway.set_up(&self.link).await
    }

    fn bind(link: Link, origin: BridgeOrigin) -> Self {
        Self {
            link,
            origin,
            ipv4: None,
            ipv6: None,
            gateway_ipv4: None,
            gateway_ipv6: None,
        }
    }

    /// Record the IPv4 addressing IPAM assigned to this bridge.
    #[must_use]
    pub fn with_ipv4(mut self, address: Option<Ipv4Net>, gateway: Option<Ipv4Addr>) -> Self {
        self.ipv4 = address;
        self.gateway_ipv4 = gateway;
        self
    }

    /// Record the IPv6 addressing IPAM assigned to this bridge.
    #[must_use]
    pub fn with_ipv6(mut self, address: Option<Ipv6Net>, gateway: Option<Ipv6Addr>) -> Self {
        self.ipv6 = address;
        self.gateway_ipv6 = gateway;
        self
    }

    /// Pretend an adopted bridge was created by us, or vice versa.
    #[must_use]
    pub fn with_origin(mut self, origin: BridgeOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Get the bridge name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.link.name
    }

    /// Kernel link handle.
    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Whether the driver created the device.
    #[must_use]
    pub fn origin(&self) -> BridgeOrigin {
        self.origin
    }

    /// Delete the bridge device.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; callers treat it as best effort.
    pub async fn delete(&self, gateway: &dyn LinkGateway) -> NetResult<()> {
        tracing::debug!(bridge = %self.link.name, "Deleting bridge");
        gateway.delete_link(&self.link).await
    }
}
