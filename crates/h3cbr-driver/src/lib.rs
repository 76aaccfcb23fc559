//! # h3cbr-driver
//!
//! Local-scope bridge network driver for the libnetwork remote plugin
//! protocol.
//!
//! A [`Driver`] owns the registry of networks, each backed by a bridge
//! device, and provisions endpoints as veth pairs attached to that bridge.
//! All kernel access goes through a shared [`h3cbr_network::LinkGateway`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use h3cbr_driver::{Driver, DriverConfig};
//! use h3cbr_network::MockGateway;
//!
//! let driver = Driver::new(Arc::new(MockGateway::new()), DriverConfig::default());
//! assert_eq!(driver.capabilities().scope, "local");
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod driver;
pub mod provision;
pub mod state;

pub use config::{EndpointConfiguration, NetworkConfiguration, NetworkMode};
pub use driver::{Driver, DriverConfig};
pub use provision::elect_mac_address;
pub use state::{Endpoint, EndpointEntry, Network, NetworkRegistry, Reservation};
