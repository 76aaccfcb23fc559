//! # h3cbr-common
//!
//! Shared types for the h3cbr bridge network driver.
//!
//! This crate provides functionality used across all h3cbr crates:
//! - Network and endpoint ID validation
//! - The common error type and its kind classification

#![warn(missing_docs)]

pub mod error;
pub mod id;

pub use error::{Cause, ErrorKind, NetError, NetResult};
pub use id::{EndpointId, NetworkId};
