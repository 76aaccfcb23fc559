//! Kernel link gateway.
//!
//! Every device operation the driver performs goes through [`LinkGateway`].
//! Each call is one atomic kernel operation; there are no multi-step
//! transactions, so callers compose them and compensate on failure.

use std::fmt;

use async_trait::async_trait;
use h3cbr_common::{NetError, NetResult};

use crate::mac::MacAddr;

/// Kind of a kernel link, as far as the driver cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Linux bridge.
    Bridge,
    /// One end of a veth pair.
    Veth,
    /// Anything else (physical NIC, dummy, vxlan, ...).
    Other,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bridge => "bridge",
            Self::Veth => "veth",
            Self::Other => "other",
        })
    }
}

/// Handle to a kernel link in the host namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    /// Interface index.
    pub index: u32,
    /// Interface name.
    pub name: String,
    /// Link kind.
    pub kind: LinkKind,
}

impl Link {
    /// Whether the link is a bridge device.
    #[must_use]
    pub fn is_bridge(&self) -> bool {
        self.kind == LinkKind::Bridge
    }
}

/// Link-management operations on the host's default network namespace.
///
/// Implementations must bound every call with their own timeout; the driver
/// adds none.
#[async_trait]
pub trait LinkGateway: Send + Sync {
    /// Look up a link by name. `Ok(None)` when no such link exists.
    async fn link_by_name(&self, name: &str) -> NetResult<Option<Link>>;

    /// Create a bridge device.
    async fn add_bridge(&self, name: &str) -> NetResult<()>;

    /// Create a bridge device through the legacy ioctl interface.
    async fn add_bridge_legacy(&self, name: &str) -> NetResult<()> {
        Err(NetError::Internal {
            message: format!("legacy bridge creation not available for {name}"),
        })
    }

    /// Create a veth pair `host` <=> `peer` in one call.
    async fn add_veth(&self, host: &str, peer: &str) -> NetResult<()>;

    /// Delete a link. Deleting one end of a veth pair removes both.
    async fn delete_link(&self, link: &Link) -> NetResult<()>;

    /// Attach `link` to `bridge`.
    async fn set_master(&self, link: &Link, bridge: &Link) -> NetResult<()>;

    /// Attach `link` to `bridge` through the legacy ioctl interface.
    async fn set_master_legacy(&self, link: &Link, bridge: &Link) -> NetResult<()> {
        Err(NetError::Internal {
            message: format!(
                "legacy enslave of {} to {} not available",
                link.name, bridge.name
            ),
        })
    }

    /// Set the MTU of a link.
    async fn set_mtu(&self, link: &Link, mtu: u32) -> NetResult<()>;

    /// Set the hardware address of a link.
    async fn set_mac(&self, link: &Link, mac: MacAddr) -> NetResult<()>;

    /// Bring a link administratively up.
    async fn set_up(&self, link: &Link) -> NetResult<()>;
}

/// Resolve a link that must exist.
///
/// # Errors
///
/// Fails with a link error when the lookup fails or the link is absent.
pub async fn require_link(gateway: &dyn LinkGateway, name: &str) -> NetResult<Link> {
    gateway.link_by_name(name).await?.ok_or_else(|| {
        NetError::link(
            "find",
            name,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
        )
    })
}

/// Attach `link` to `bridge`, falling back to the legacy ioctl when netlink
/// refuses.
///
/// # Errors
///
/// Returns the legacy error when both paths fail.
pub async fn attach_to_bridge(
    gateway: &dyn LinkGateway,
    link: &Link,
    bridge: &Link,
) -> NetResult<()> {
    if let Err(err) = gateway.set_master(link, bridge).await {
        tracing::debug!(
            interface = %link.name,
            bridge = %bridge.name,
            error = %err,
            "Failed to add interface to bridge via netlink, trying ioctl"
        );
        return gateway.set_master_legacy(link, bridge).await;
    }
    Ok(())
}
