//! In-memory gateway for testing and development.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use h3cbr_common::{NetError, NetResult};
use parking_lot::Mutex;

use crate::gateway::{Link, LinkGateway, LinkKind};
use crate::mac::MacAddr;

/// Gateway operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `link_by_name`.
    Lookup,
    /// `add_bridge`.
    AddBridge,
    /// `add_bridge_legacy`.
    AddBridgeLegacy,
    /// `add_veth`.
    AddVeth,
    /// `delete_link`.
    Delete,
    /// `set_master`.
    SetMaster,
    /// `set_master_legacy`.
    SetMasterLegacy,
    /// `set_mtu`.
    SetMtu,
    /// `set_mac`.
    SetMac,
    /// `set_up`.
    SetUp,
}

/// Observable state of one simulated link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockLink {
    /// Handle as returned by lookups.
    pub link: Link,
    /// Veth peer name.
    pub peer: Option<String>,
    /// Index of the bridge this link is attached to.
    pub master: Option<u32>,
    /// MTU.
    pub mtu: u32,
    /// Hardware address, when one was set explicitly.
    pub mac: Option<MacAddr>,
    /// Administrative state.
    pub up: bool,
}

#[derive(Default)]
struct MockState {
    links: BTreeMap<String, MockLink>,
    next_index: u32,
    calls: HashMap<MockOp, usize>,
    fail_always: HashSet<MockOp>,
    fail_nth: HashMap<MockOp, usize>,
}

impl MockState {
    fn record(&mut self, op: MockOp, name: &str) -> NetResult<()> {
        let count = self.calls.entry(op).or_default();
        *count += 1;
        let nth = *count;
        if self.fail_always.contains(&op) || self.fail_nth.get(&op) == Some(&nth) {
            return Err(NetError::link(
                "perform mock operation",
                name,
                std::io::Error::other(format!("injected {op:?} failure")),
            ));
        }
        Ok(())
    }

    fn insert(&mut self, name: &str, kind: LinkKind, peer: Option<String>) -> NetResult<()> {
        if self.links.contains_key(name) {
            return Err(NetError::link(
                "create",
                name,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file exists"),
            ));
        }
        self.next_index += 1;
        let link = Link {
            index: self.next_index,
            name: name.to_string(),
            kind,
        };
        self.links.insert(
            name.to_string(),
            MockLink {
                link,
                peer,
                master: None,
                mtu: 1500,
                mac: None,
                up: false,
            },
        );
        Ok(())
    }

    fn get_mut(&mut self, link: &Link) -> NetResult<&mut MockLink> {
        self.links
            .get_mut(&link.name)
            .filter(|l| l.link.index == link.index)
            .ok_or_else(|| {
                NetError::link(
                    "find",
                    &link.name,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
                )
            })
    }
}

/// Mock gateway keeping links in memory.
///
/// Useful for:
/// - Unit and integration testing of the driver
/// - Running the daemon without CAP_NET_ADMIN
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    /// Create an empty mock host.
    #[must_use]
    pub fn new() -> Self {
        tracing::info!("Creating mock link gateway");
        Self {
            state: Mutex::new(MockState {
                next_index: 1, // lo
                ..MockState::default()
            }),
        }
    }

    /// Seed a pre-existing link, as if created outside the driver.
    #[must_use]
    pub fn with_link(self, name: &str, kind: LinkKind) -> Self {
        // Seeding a duplicate name is a test bug; keep the first one.
        let _ = self.state.lock().insert(name, kind, None);
        self
    }

    /// Make every call of `op` fail.
    pub fn fail_on(&self, op: MockOp) {
        self.state.lock().fail_always.insert(op);
    }

    /// Make only the `n`th call (1-based, counted from creation) of `op` fail.
    pub fn fail_nth(&self, op: MockOp, n: usize) {
        self.state.lock().fail_nth.insert(op, n);
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.fail_always.clear();
        state.fail_nth.clear();
    }

    /// Number of calls made to `op` so far.
    #[must_use]
    pub fn calls(&self, op: MockOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Snapshot of one link.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<MockLink> {
        self.state.lock().links.get(name).cloned()
    }

    /// Names of all live links.
    #[must_use]
    pub fn link_names(&self) -> Vec<String> {
        self.state.lock().links.keys().cloned().collect()
    }

    /// Names of all live links of one kind.
    #[must_use]
    pub fn links_of_kind(&self, kind: LinkKind) -> Vec<String> {
        self.state
            .lock()
            .links
            .values()
            .filter(|l| l.link.kind == kind)
            .map(|l| l.link.name.clone())
            .collect()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkGateway for MockGateway {
    async fn link_by_name(&self, name: &str) -> NetResult<Option<Link>> {
        let mut state = self.state.lock();
        state.record(MockOp::Lookup, name)?;
        Ok(state.links.get(name).map(|l| l.link.clone()))
    }

    async fn add_bridge(&self, name: &str) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::AddBridge, name)?;
        state.insert(name, LinkKind::Bridge, None)
    }

    async fn add_bridge_legacy(&self, name: &str) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::AddBridgeLegacy, name)?;
        state.insert(name, LinkKind::Bridge, None)
    }

    async fn add_veth(&self, host: &str, peer: &str) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::AddVeth, host)?;
        if state.links.contains_key(peer) {
            return Err(NetError::link(
                "create veth pair",
                peer,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "file exists"),
            ));
        }
        state.insert(host, LinkKind::Veth, Some(peer.to_string()))?;
        state.insert(peer, LinkKind::Veth, Some(host.to_string()))
    }

    async fn delete_link(&self, link: &Link) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::Delete, &link.name)?;
        let peer = state.get_mut(link)?.peer.clone();
        state.links.remove(&link.name);
        if let Some(peer) = peer {
            state.links.remove(&peer);
        }
        Ok(())
    }

    async fn set_master(&self, link: &Link, bridge: &Link) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::SetMaster, &link.name)?;
        state.get_mut(bridge)?;
        state.get_mut(link)?.master = Some(bridge.index);
        Ok(())
    }

    async fn set_master_legacy(&self, link: &Link, bridge: &Link) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::SetMasterLegacy, &link.name)?;
        state.get_mut(bridge)?;
        state.get_mut(link)?.master = Some(bridge.index);
        Ok(())
    }

    async fn set_mtu(&self, link: &Link, mtu: u32) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::SetMtu, &link.name)?;
        state.get_mut(link)?.mtu = mtu;
        Ok(())
    }

    async fn set_mac(&self, link: &Link, mac: MacAddr) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::SetMac, &link.name)?;
        state.get_mut(link)?.mac = Some(mac);
        Ok(())
    }

    async fn set_up(&self, link: &Link) -> NetResult<()> {
        let mut state = self.state.lock();
        state.record(MockOp::SetUp, &link.name)?;
        state.get_mut(link)?.up = true;
        Ok(())
    }
}
