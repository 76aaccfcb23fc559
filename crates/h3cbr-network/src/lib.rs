//! # h3cbr-network
//!
//! Networking primitives for the h3cbr driver.
//!
//! This crate wraps kernel link management behind [`LinkGateway`] and builds
//! the bridge and veth helpers the driver composes.

#![warn(missing_docs)]

pub mod bridge;
pub mod gateway;
pub mod kernel;
pub mod legacy;
pub mod mac;
pub mod mock;
pub mod rtnl;
pub mod veth;

pub use bridge::{BridgeInterface, BridgeOrigin};
pub use gateway::{Link, LinkGateway, LinkKind, attach_to_bridge, require_link};
pub use kernel::{KernelVersion, bridge_mac_supported};
pub use mac::MacAddr;
pub use mock::{MockGateway, MockOp};
pub use rtnl::{NETLINK_SOCKET_TIMEOUT, RtNetlinkGateway};
pub use veth::{VETH_LEN, VETH_PREFIX, VethPair, generate_ifname};
