//! Host kernel release detection.

use std::fmt;
use std::str::FromStr;

use h3cbr_common::{NetError, NetResult};

/// Kernel version triple parsed from the release string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    /// Major version.
    pub kernel: u32,
    /// Minor version.
    pub major: u32,
    /// Patch level.
    pub minor: u32,
}

impl KernelVersion {
    /// Read the running kernel's release via `uname(2)`.
    ///
    /// # Errors
    ///
    /// Fails when the release string cannot be parsed.
    pub fn current() -> NetResult<Self> {
        let uname = rustix::system::uname();
        let release = uname.release().to_string_lossy();
        release.parse()
    }

    /// Bridges accept an explicit MAC address from 3.3 on.
    #[must_use]
    pub fn supports_bridge_mac(&self) -> bool {
        (self.kernel, self.major) >= (3, 3)
    }
}

impl FromStr for KernelVersion {
    type Err = NetError;

    /// Parses `5.15.0-91-generic`, `6.1`, `4.19.0+` and friends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetError::Internal {
            message: format!("cannot parse kernel release {s:?}"),
        };
        let numeric = s
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .next()
            .unwrap_or_default();
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());
        let kernel = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let major = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Ok(Self {
            kernel,
            major,
            minor,
        })
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.kernel, self.major, self.minor)
    }
}

/// Whether the running kernel lets us set a bridge's MAC address.
///
/// Detection failure is logged and treated as "no".
#[must_use]
pub fn bridge_mac_supported() -> bool {
    match KernelVersion::current() {
        Ok(version) => {
            tracing::debug!(%version, "Detected kernel version");
            version.supports_bridge_mac()
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                "Failed to check kernel version, will not assign a MAC address to bridge interfaces"
            );
            false
        }
    }
}
