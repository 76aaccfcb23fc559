//! Virtual ethernet pair management.

use h3cbr_common::{NetError, NetResult};

use crate::gateway::{Link, LinkGateway, require_link};

/// Prefix of generated veth names.
pub const VETH_PREFIX: &str = "veth";

/// Number of random hex characters after the prefix.
pub const VETH_LEN: usize = 7;

const NAME_ATTEMPTS: usize = 3;

fn random_suffix(len: usize) -> String {
    let uuid = uuid::Uuid::new_v4();
    let mut suffix = hex::encode(uuid.as_bytes());
    suffix.truncate(len);
    suffix
}

/// Generate an interface name `prefix` + `len` random hex characters that
/// no host link currently uses.
///
/// # Errors
///
/// Fails when the lookup fails or three candidates are all taken.
pub async fn generate_ifname(
    gateway: &dyn LinkGateway,
    prefix: &str,
    len: usize,
) -> NetResult<String> {
    for _ in 0..NAME_ATTEMPTS {
        let name = format!("{prefix}{}", random_suffix(len));
        if gateway.link_by_name(&name).await?.is_none() {
            return Ok(name);
        }
        tracing::debug!(name, "Generated interface name already in use");
    }
    Err(NetError::Internal {
        message: format!("could not generate a free interface name with prefix {prefix}"),
    })
}

/// Virtual ethernet pair.
#[derive(Debug, Clone)]
pub struct VethPair {
    /// Host-side link.
    pub host: Link,
    /// Container-side link.
    pub container: Link,
}

impl VethPair {
    /// Create the pair `host_name` <=> `container_name` in one kernel call.
    ///
    /// # Errors
    ///
    /// Returns the gateway error; nothing was created in that case.
    pub async fn create(
        gateway: &dyn LinkGateway,
        host_name: &str,
        container_name: &str,
    ) -> NetResult<()> {
        tracing::debug!(host_name, container_name, "Creating veth pair");
        gateway
            .add_veth(host_name, container_name)
            .await
            .map_err(|err| match err {
                NetError::Link {
                    interface, source, ..
                } => NetError::Link {
                    operation: "add the host <=> sandbox pair interfaces",
                    interface: format!("{interface} <=> {container_name}"),
                    source,
                },
                other => other,
            })
    }

    /// Resolve both ends of a freshly created pair.
    ///
    /// # Errors
    ///
    /// Fails when either end cannot be found.
    pub async fn resolve(
        gateway: &dyn LinkGateway,
        host_name: &str,
        container_name: &str,
    ) -> NetResult<Self> {
        let host = require_link(gateway, host_name).await?;
        let container = require_link(gateway, container_name).await?;
        Ok(Self { host, container })
    }

    /// Delete the veth pair through its host side.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn delete(&self, gateway: &dyn LinkGateway) -> NetResult<()> {
        tracing::debug!(host = %self.host.name, "Deleting veth pair");
        gateway.delete_link(&self.host).await
    }
}

/// Delete the host side of a veth pair by name, if it still exists.
///
/// Used on rollback paths where handles may never have been resolved.
///
/// # Errors
///
/// Returns the lookup or deletion error.
pub async fn delete_by_name(gateway: &dyn LinkGateway, host_name: &str) -> NetResult<bool> {
    match gateway.link_by_name(host_name).await? {
        Some(link) => {
            gateway.delete_link(&link).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}
