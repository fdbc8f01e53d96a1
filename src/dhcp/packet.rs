//! BOOTP-framed DHCP packet: the fixed header plus a variable-length options
//! area terminated by the magic cookie and a run of TLV options.

use crate::error::ProtocolError;
use crate::net_types::{ByteArray, MacAddr};
use byte_struct::*;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
/// Minimum total packet size (fixed header + cookie + options), §4.B.
pub const MIN_PACKET_SIZE: usize = 300;

pub const OP_BOOTREQUEST: u8 = 1;
pub const OP_BOOTREPLY: u8 = 2;

/// Fixed 236-byte BOOTP header preceding the magic cookie and options.
#[derive(ByteStruct, Debug, Clone, Copy, PartialEq, Eq)]
#[byte_struct_be]
pub struct BootpHeader {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: ByteArray<4>,
    pub yiaddr: ByteArray<4>,
    pub siaddr: ByteArray<4>,
    pub giaddr: ByteArray<4>,
    pub chaddr: ByteArray<16>,
    pub sname: ByteArray<64>,
    pub file: ByteArray<128>,
}

fn ip_to_bytes(ip: Ipv4Addr) -> ByteArray<4> {
    ByteArray(ip.octets())
}

fn bytes_to_ip(b: &ByteArray<4>) -> Ipv4Addr {
    Ipv4Addr::from(b.0)
}

/// A parsed DHCP packet: BOOTP fixed fields plus the options map, in the
/// order option 55 (when present) requested, unknown codes preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: MacAddr,
    pub sname: String,
    pub file: String,
    /// Options in on-wire order as received (or to be written, for a reply
    /// being constructed). Code 255 (End) and 0 (Pad) are not stored here.
    pub options: BTreeMap<u8, Vec<u8>>,
    /// Order in which options were encountered on the wire, for round-trip
    /// fidelity of a parsed packet; ignored when serializing a freshly built
    /// reply, which instead follows the PRL order (§3 "DHCP Options Map").
    pub option_order: Vec<u8>,
}

impl DhcpPacket {
    pub fn new_reply(op: u8, xid: u32, flags: u16, giaddr: Ipv4Addr, chaddr: MacAddr) -> Self {
        DhcpPacket {
            op,
            htype: 1,
            xid,
            secs: 0,
            flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr,
            chaddr,
            sname: String::new(),
            file: String::new(),
            options: BTreeMap::new(),
            option_order: Vec::new(),
        }
    }

    pub fn set_option(&mut self, code: u8, value: Vec<u8>) {
        if !self.options.contains_key(&code) {
            self.option_order.push(code);
        }
        self.options.insert(code, value);
    }

    pub fn option_u8(&self, code: u8) -> Option<u8> {
        self.options.get(&code).and_then(|v| v.first().copied())
    }

    pub fn option_str(&self, code: u8) -> Option<&str> {
        self.options
            .get(&code)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn message_type(&self) -> Option<u8> {
        self.option_u8(53)
    }

    /// Parse a received UDP datagram as a BOOTP/DHCP packet.
    pub fn parse(buf: &[u8]) -> Result<DhcpPacket, ProtocolError> {
        if buf.len() < BootpHeader::BYTE_LEN + 4 {
            return Err(ProtocolError::TooShort(buf.len()));
        }
        let header = BootpHeader::read_bytes(&buf[0..BootpHeader::BYTE_LEN]);
        if header.op != OP_BOOTREQUEST && header.op != OP_BOOTREPLY {
            return Err(ProtocolError::InvalidOpcode(header.op));
        }
        let cookie_start = BootpHeader::BYTE_LEN;
        let cookie = &buf[cookie_start..cookie_start + 4];
        if cookie != MAGIC_COOKIE {
            return Err(ProtocolError::BadCookie);
        }

        let mut chaddr_bytes = [0u8; 6];
        chaddr_bytes.copy_from_slice(&header.chaddr.0[0..6]);

        let sname = cstr_trim(&header.sname.0);
        let file = cstr_trim(&header.file.0);

        let mut options = BTreeMap::new();
        let mut option_order = Vec::new();
        let mut i = cookie_start + 4;
        while i < buf.len() {
            let code = buf[i];
            if code == 0 {
                i += 1;
                continue;
            }
            if code == 255 {
                break;
            }
            if i + 1 >= buf.len() {
                return Err(ProtocolError::TruncatedOption(i));
            }
            let len = buf[i + 1] as usize;
            let start = i + 2;
            let end = start + len;
            if end > buf.len() {
                return Err(ProtocolError::TruncatedOption(i));
            }
            let value = buf[start..end].to_vec();
            if !options.contains_key(&code) {
                option_order.push(code);
            }
            options.insert(code, value);
            i = end;
        }

        Ok(DhcpPacket {
            op: header.op,
            htype: header.htype,
            xid: header.xid,
            secs: header.secs,
            flags: header.flags,
            ciaddr: bytes_to_ip(&header.ciaddr),
            yiaddr: bytes_to_ip(&header.yiaddr),
            siaddr: bytes_to_ip(&header.siaddr),
            giaddr: bytes_to_ip(&header.giaddr),
            chaddr: MacAddr::new(chaddr_bytes),
            sname,
            file,
            options,
            option_order,
        })
    }

    /// Serialize following the client's Parameter Request List (option 55)
    /// order when present, else on-wire/insertion order; options 66/67 are
    /// appended last when present and not already listed. Padding to
    /// `MIN_PACKET_SIZE` happens only after every option has been written.
    pub fn serialize(&self) -> Vec<u8> {
        let mut chaddr = [0u8; 16];
        chaddr[0..6].copy_from_slice(self.chaddr.as_bytes());

        let mut sname = [0u8; 64];
        let sname_bytes = self.sname.as_bytes();
        let n = sname_bytes.len().min(63);
        sname[0..n].copy_from_slice(&sname_bytes[0..n]);

        let mut file = [0u8; 128];
        let file_bytes = self.file.as_bytes();
        let n = file_bytes.len().min(127);
        file[0..n].copy_from_slice(&file_bytes[0..n]);

        let header = BootpHeader {
            op: self.op,
            htype: self.htype,
            hlen: 6,
            hops: 0,
            xid: self.xid,
            secs: self.secs,
            flags: self.flags,
            ciaddr: ip_to_bytes(self.ciaddr),
            yiaddr: ip_to_bytes(self.yiaddr),
            siaddr: ip_to_bytes(self.siaddr),
            giaddr: ip_to_bytes(self.giaddr),
            chaddr: ByteArray(chaddr),
            sname: ByteArray(sname),
            file: ByteArray(file),
        };

        let mut out = vec![0u8; BootpHeader::BYTE_LEN];
        header.write_bytes(&mut out);
        out.extend_from_slice(&MAGIC_COOKIE);

        let order = self.serialization_order();
        for code in order {
            if let Some(value) = self.options.get(&code) {
                out.push(code);
                out.push(value.len() as u8);
                out.extend_from_slice(value);
            }
        }
        out.push(255);

        if out.len() < MIN_PACKET_SIZE {
            out.resize(MIN_PACKET_SIZE, 0);
        }
        out
    }

    /// Ordering: mandatory reply options first (53/54/51/43/97, whichever
    /// are set), then the client's Parameter Request List (option 55) order
    /// when present, else on-wire/insertion order, then options 66/67 if the
    /// client is PXE-capable.
    fn serialization_order(&self) -> Vec<u8> {
        let mut order: Vec<u8> = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for code in [53u8, 54, 51, 43, 97] {
            if self.options.contains_key(&code) && seen.insert(code) {
                order.push(code);
            }
        }

        if let Some(prl) = self.options.get(&55) {
            for &code in prl {
                if self.options.contains_key(&code) && seen.insert(code) {
                    order.push(code);
                }
            }
        } else {
            for &code in &self.option_order {
                if self.options.contains_key(&code) && seen.insert(code) {
                    order.push(code);
                }
            }
        }

        for code in [66u8, 67u8] {
            if self.options.contains_key(&code) && seen.insert(code) {
                order.push(code);
            }
        }

        // Anything left over (e.g. not requested, not 66/67) still ships so
        // no option the caller set is silently dropped.
        for (&code, _) in self.options.iter() {
            if seen.insert(code) {
                order.push(code);
            }
        }
        order
    }
}

fn cstr_trim(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[0..end]).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> DhcpPacket {
        let mut p = DhcpPacket::new_reply(
            OP_BOOTREQUEST,
            0x11223344,
            0,
            Ipv4Addr::UNSPECIFIED,
            MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
        );
        p.set_option(53, vec![1]);
        p.set_option(93, vec![0, 0]);
        p.set_option(55, vec![1, 3, 6, 66, 67]);
        p
    }

    #[test]
    fn roundtrip_preserves_header_and_options() {
        let packet = sample();
        let wire = packet.serialize();
        assert!(wire.len() >= MIN_PACKET_SIZE);
        let parsed = DhcpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.xid, packet.xid);
        assert_eq!(parsed.chaddr, packet.chaddr);
        assert_eq!(parsed.options.get(&53), packet.options.get(&53));
        assert_eq!(parsed.options.get(&93), packet.options.get(&93));
        assert_eq!(parsed.options.get(&55), packet.options.get(&55));
    }

    #[test]
    fn rejects_short_packet() {
        assert!(matches!(
            DhcpPacket::parse(&[0u8; 10]),
            Err(ProtocolError::TooShort(_))
        ));
    }

    #[test]
    fn rejects_bad_cookie() {
        let mut wire = sample().serialize();
        wire[BootpHeader::BYTE_LEN] = 0;
        assert!(matches!(
            DhcpPacket::parse(&wire),
            Err(ProtocolError::BadCookie)
        ));
    }

    #[test]
    fn serialize_orders_by_parameter_request_list() {
        let mut p = sample();
        p.set_option(3, vec![192, 168, 1, 1]);
        p.set_option(6, vec![8, 8, 8, 8]);
        p.set_option(1, vec![255, 255, 255, 0]);
        let wire = p.serialize();
        // Options begin right after the 4-byte cookie.
        let options_start = BootpHeader::BYTE_LEN + 4;
        // Mandatory option 53 (message type) ships first regardless of PRL
        // placement; the PRL order [1, 3, 6, 66, 67] governs the rest.
        assert_eq!(wire[options_start], 53);
        assert_eq!(wire[options_start + 3], 1);
    }

    #[test]
    fn unknown_options_round_trip() {
        let mut p = sample();
        p.set_option(175, vec![9, 9, 9]);
        let wire = p.serialize();
        let parsed = DhcpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.options.get(&175), Some(&vec![9, 9, 9]));
    }
}
