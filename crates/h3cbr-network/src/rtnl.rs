//! rtnetlink-backed [`LinkGateway`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use h3cbr_common::{NetError, NetResult};
use rtnetlink::packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};
use rtnetlink::{Handle, LinkBridge, LinkUnspec, LinkVeth};

use crate::gateway::{Link, LinkGateway, LinkKind};
use crate::legacy;
use crate::mac::MacAddr;

/// Default per-call timeout on the netlink socket.
pub const NETLINK_SOCKET_TIMEOUT: Duration = Duration::from_secs(3);

/// Gateway talking to the kernel over one shared rtnetlink connection.
#[derive(Clone)]
pub struct RtNetlinkGateway {
    handle: Handle,
    timeout: Duration,
}

impl RtNetlinkGateway {
    /// Open a netlink connection in the current namespace.
    ///
    /// Must be called from within a tokio runtime; the connection task is
    /// spawned onto it and lives until the runtime shuts down.
    ///
    /// # Errors
    ///
    /// Fails when the netlink socket cannot be opened.
    pub fn new(timeout: Duration) -> NetResult<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        tracing::debug!(?timeout, "Opened netlink connection");
        Ok(Self { handle, timeout })
    }

    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run<T, F>(&self, operation: &'static str, interface: &str, call: F) -> NetResult<T>
    where
        F: Future<Output = Result<T, rtnetlink::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(NetError::link(operation, interface, err)),
            Err(_) => Err(self.timed_out(operation, interface)),
        }
    }

    fn timed_out(&self, operation: &'static str, interface: &str) -> NetError {
        NetError::Timeout {
            operation,
            interface: interface.to_string(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

fn link_from_message(message: &LinkMessage) -> Link {
    let mut name = String::new();
    let mut kind = LinkKind::Other;
    for attr in &message.attributes {
        match attr {
            LinkAttribute::IfName(n) => name.clone_from(n),
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    if let LinkInfo::Kind(k) = info {
                        kind = match k {
                            InfoKind::Bridge => LinkKind::Bridge,
                            InfoKind::Veth => LinkKind::Veth,
                            _ => LinkKind::Other,
                        };
                    }
                }
            }
            _ => {}
        }
    }
    Link {
        index: message.header.index,
        name,
        kind,
    }
}

#[async_trait]
impl LinkGateway for RtNetlinkGateway {
    async fn link_by_name(&self, name: &str) -> NetResult<Option<Link>> {
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();
        match tokio::time::timeout(self.timeout, links.try_next()).await {
            Ok(Ok(message)) => Ok(message.as_ref().map(link_from_message)),
            Ok(Err(rtnetlink::Error::NetlinkError(e))) if e.raw_code() == -libc::ENODEV => Ok(None),
            Ok(Err(err)) => Err(NetError::link("look up", name, err)),
            Err(_) => Err(self.timed_out("look up", name)),
        }
    }

    async fn add_bridge(&self, name: &str) -> NetResult<()> {
        let request = self.handle.link().add(LinkBridge::new(name).build());
        self.run("create bridge", name, request.execute()).await
    }

    async fn add_bridge_legacy(&self, name: &str) -> NetResult<()> {
        legacy::create_bridge(name)
    }

    async fn add_veth(&self, host: &str, peer: &str) -> NetResult<()> {
        let request = self.handle.link().add(LinkVeth::new(host, peer).build());
        self.run("create veth pair", host, request.execute()).await
    }

    async fn delete_link(&self, link: &Link) -> NetResult<()> {
        let request = self.handle.link().del(link.index);
        self.run("delete", &link.name, request.execute()).await
    }

    async fn set_master(&self, link: &Link, bridge: &Link) -> NetResult<()> {
        let message = LinkUnspec::new_with_index(link.index)
            .controller(bridge.index)
            .build();
        let request = self.handle.link().set(message);
        self.run("attach to bridge", &link.name, request.execute()).await
    }

    async fn set_master_legacy(&self, link: &Link, bridge: &Link) -> NetResult<()> {
        legacy::add_to_bridge(&bridge.name, link)
    }

    async fn set_mtu(&self, link: &Link, mtu: u32) -> NetResult<()> {
        let message = LinkUnspec::new_with_index(link.index).mtu(mtu).build();
        let request = self.handle.link().set(message);
        self.run("set MTU", &link.name, request.execute()).await
    }

    async fn set_mac(&self, link: &Link, mac: MacAddr) -> NetResult<()> {
        let message = LinkUnspec::new_with_index(link.index)
            .address(mac.octets().to_vec())
            .build();
        let request = self.handle.link().set(message);
        self.run("set MAC address", &link.name, request.execute()).await
    }

    async fn set_up(&self, link: &Link) -> NetResult<()> {
        let message = LinkUnspec::new_with_index(link.index).up().build();
        let request = self.handle.link().set(message);
        self.run("set link up", &link.name, request.execute()).await
    }
}
