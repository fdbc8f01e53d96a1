//! Small shared address types used across the DHCP, TFTP and boot-decision
//! modules.
//!
//! `std::net::Ipv4Addr` already covers IPv4; there is no standard-library
//! equivalent for an Ethernet hardware address, so we define one here,
//! sized and traited for use as a `HashMap`/`BTreeMap` key in a std context.

use byte_struct::{ByteStruct, ByteStructLen};
use std::fmt;
use std::str::FromStr;

/// Standard 6-byte Ethernet hardware address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn new(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
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

/// Error returned when a string does not parse as `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid hardware address")]
pub struct ParseMacAddrError;

impl FromStr for MacAddr {
    type Err = ParseMacAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split(':');
        for slot in out.iter_mut() {
            let part = parts.next().ok_or(ParseMacAddrError)?;
            *slot = u8::from_str_radix(part, 16).map_err(|_| ParseMacAddrError)?;
        }
        if parts.next().is_some() {
            return Err(ParseMacAddrError);
        }
        Ok(MacAddr(out))
    }
}

/// Wire representation so `MacAddr` can be embedded directly in a
/// `#[derive(ByteStruct)]` packet header.
impl ByteStructLen for MacAddr {
    const BYTE_LEN: usize = 6;
}

impl ByteStruct for MacAddr {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut out = [0u8; 6];
        out.copy_from_slice(&bytes[0..6]);
        MacAddr(out)
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0..6].copy_from_slice(&self.0);
    }
}

/// Fixed-length, otherwise-opaque byte array with a `ByteStruct` impl, for
/// embedding raw padding/name fields (BOOTP `sname`/`file`/`chaddr` padding)
/// in a `#[derive(ByteStruct)]` header.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ByteArray<const N: usize>(pub [u8; N]);

impl<const N: usize> fmt::Debug for ByteArray<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteArray<{N}>")
    }
}

impl<const N: usize> Default for ByteArray<N> {
    fn default() -> Self {
        ByteArray([0u8; N])
    }
}

impl<const N: usize> ByteStructLen for ByteArray<N> {
    const BYTE_LEN: usize = N;
}

impl<const N: usize> ByteStruct for ByteArray<N> {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes[0..N]);
        ByteArray(out)
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0..N].copy_from_slice(&self.0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_display_parse() {
        let mac = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
        let s = mac.to_string();
        assert_eq!(s, "aa:bb:cc:dd:ee:01");
        let parsed: MacAddr = s.parse().unwrap();
        assert_eq!(parsed, mac);
    }

    #[test]
    fn rejects_malformed() {
        assert!("not-a-mac".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddr>().is_err());
    }
}
