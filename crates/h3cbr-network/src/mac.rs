//! Ethernet hardware addresses.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use h3cbr_common::NetError;

/// Locally administered vendor bytes prepended to IPv4-derived addresses.
pub const IP_MAC_PREFIX: [u8; 2] = [0x7a, 0x42];

/// A 48-bit Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Build from raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Derive a MAC from an IPv4 address: `7a:42` followed by the four
    /// address octets. The same address always yields the same MAC.
    #[must_use]
    pub const fn from_ipv4(ip: Ipv4Addr) -> Self {
        let [a, b, c, d] = ip.octets();
        Self([IP_MAC_PREFIX[0], IP_MAC_PREFIX[1], a, b, c, d])
    }

    /// A random, locally administered unicast address.
    #[must_use]
    pub fn random() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&uuid.as_bytes()[..6]);
        octets[0] &= 0xfe; // unicast
        octets[0] |= 0x02; // locally administered
        Self(octets)
    }

    /// Whether the multicast bit is clear.
    #[must_use]
    pub const fn is_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0
    }

    /// Whether the locally-administered bit is set.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl FromStr for MacAddr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetError::bad_request(format!("invalid MAC address: {s:?}"));

        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_derives_from_ipv4() {
        let mac = MacAddr::from_ipv4(Ipv4Addr::new(172, 20, 0, 2));
        assert_eq!(mac.to_string(), "7a:42:ac:14:00:02");
    }

    #[test]
    fn test_derivation_is_stable() {
        let ip: Ipv4Addr = "10.0.0.5".parse().unwrap();
        assert_eq!(MacAddr::from_ipv4(ip), MacAddr::from_ipv4(ip));
        assert_eq!(MacAddr::from_ipv4(ip).to_string(), "7a:42:0a:00:00:05");
    }

    #[test]
    fn test_parses_colon_form() {
        let mac: MacAddr = "02:42:AC:11:00:02".parse().unwrap();
        assert_eq!(mac.octets(), [0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
        assert_eq!(mac.to_string(), "02:42:ac:11:00:02");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "02:42:ac:11:00", "02:42:ac:11:00:02:03", "0g:42:ac:11:00:02", "2:42:ac:11:00:002"] {
            assert!(bad.parse::<MacAddr>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_random_is_local_unicast() {
        for _ in 0..32 {
            let mac = MacAddr::random();
            assert!(mac.is_unicast());
            assert!(mac.is_local());
        }
    }

    proptest! {
        #[test]
        fn test_from_ipv4_keeps_octets(a: u8, b: u8, c: u8, d: u8) {
            let mac = MacAddr::from_ipv4(Ipv4Addr::new(a, b, c, d));
            prop_assert_eq!(mac.octets(), [0x7a, 0x42, a, b, c, d]);
            prop_assert_eq!(mac, MacAddr::from_ipv4(Ipv4Addr::new(a, b, c, d)));
        }
    }
}
