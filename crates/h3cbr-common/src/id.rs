//! Network and endpoint identifiers.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::{NetError, NetResult};

/// Maximum length of an identifier handed to us by the orchestrator.
pub const MAX_ID_LENGTH: usize = 64;

fn validate(kind: &str, id: &str) -> NetResult<()> {
    if id.is_empty() {
        return Err(NetError::bad_request(format!("invalid {kind} id: empty")));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(NetError::bad_request(format!(
            "invalid {kind} id: longer than {MAX_ID_LENGTH} characters"
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        return Err(NetError::bad_request(format!(
            "invalid {kind} id {id}: unexpected character {c:?}"
        )));
    }
    Ok(())
}

fn prefix(id: &str, len: usize) -> &str {
    // ids are ASCII once validated, so byte slicing is safe
    if id.len() <= len { id } else { &id[..len] }
}

/// A validated network ID.
///
/// Network IDs must:
/// - Be 1-64 characters long
/// - Contain only alphanumeric characters, hyphens, and underscores
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    /// Create a new network ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::BadRequest`] if the ID is empty or malformed.
    pub fn new(id: impl Into<String>) -> NetResult<Self> {
        let id = id.into();
        validate("network", &id)?;
        Ok(Self(id))
    }

    /// Get the network ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first `len` characters of the ID (or the whole ID when shorter).
    #[must_use]
    pub fn truncated(&self, len: usize) -> &str {
        prefix(&self.0, len)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for NetworkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NetworkId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A validated endpoint ID, unique within its network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create a new endpoint ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::BadRequest`] if the ID is empty or malformed.
    pub fn new(id: impl Into<String>) -> NetResult<Self> {
        let id = id.into();
        validate("endpoint", &id)?;
        Ok(Self(id))
    }

    /// Get the endpoint ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short version of the ID (first 12 characters), for logs.
    #[must_use]
    pub fn short(&self) -> &str {
        prefix(&self.0, 12)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EndpointId {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for EndpointId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EndpointId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
