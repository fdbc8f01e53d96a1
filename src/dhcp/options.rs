//! Interpretation helpers for the handful of DHCP options the boot decision
//! engine cares about: 93 (client architecture), 77 (user class), 97 (client
//! UUID), 55 (parameter request list).

use crate::error::ProtocolError;
use crate::dhcp::packet::DhcpPacket;

/// Option 93: PXE client system architecture, big-endian uint16.
pub fn client_arch(packet: &DhcpPacket) -> Result<Option<u16>, ProtocolError> {
    match packet.options.get(&93) {
        None => Ok(None),
        Some(v) if v.len() == 2 => Ok(Some(u16::from_be_bytes([v[0], v[1]]))),
        Some(_) => Err(ProtocolError::MalformedArch("expected 2 bytes")),
    }
}

/// Option 77: user class, treated as an ASCII string (e.g. `"iPXE"`,
/// `"pixiecore"`).
pub fn user_class(packet: &DhcpPacket) -> Option<&str> {
    packet.option_str(77)
}

/// Option 97: client UUID/GUID. RFC 4578 requires the first byte be a type
/// indicator (0 = GUID); either a zero-length value or exactly 17 bytes are
/// accepted, any other length is rejected.
pub fn client_guid(packet: &DhcpPacket) -> Result<Option<&[u8]>, ProtocolError> {
    match packet.options.get(&97) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) if v.len() == 17 => {
            if v[0] != 0 {
                return Err(ProtocolError::MalformedGuid("type byte must be zero"));
            }
            Ok(Some(&v[1..]))
        }
        Some(_) => Err(ProtocolError::MalformedGuid("expected 0 or 17 bytes")),
    }
}

/// Option 55: parameter request list, an ordered list of option codes.
pub fn parameter_request_list(packet: &DhcpPacket) -> Option<&[u8]> {
    packet.options.get(&55).map(|v| v.as_slice())
}

/// Option 60: vendor class identifier starts with `"PXEClient"` for PXE
/// clients (with or without a trailing `:arch:...` suffix).
pub fn is_pxe_client(packet: &DhcpPacket) -> bool {
    packet
        .option_str(60)
        .map(|v| v.starts_with("PXEClient"))
        .unwrap_or(false)
        || packet.options.contains_key(&93)
}
