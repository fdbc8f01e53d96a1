//! Classifies a DHCP boot request into a `Machine` and asks a `Booter`
//! capability for the `BootSpec` that drives offer construction.

use crate::dhcp::{self, DhcpPacket};
use crate::error::{BooterError, ProtocolError};
use crate::net_types::MacAddr;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    IA32,
    X64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Firmware {
    BiosPxe,
    Efi32,
    Efi64,
    EfiBc,
    BiosIpxe,
    ChainloadedIpxe,
}

impl Firmware {
    /// Numeric tag embedded in `BootFilename = "<hwaddr>/<fwtype>"`. This is
    /// the ordinal of the original's `Firmware` enum
    /// (`FirmwareX86PC=0, FirmwareEFI32=1, FirmwareEFI64=2, FirmwareEFIBC=3,
    /// FirmwareX86Ipxe=4, FirmwarePxecoreIpxe=5`), *not* the option-93
    /// architecture code — the two numberings coincide only for `BiosPxe`.
    pub fn wire_value(self) -> u16 {
        match self {
            Firmware::BiosPxe => 0,
            Firmware::Efi32 => 1,
            Firmware::Efi64 => 2,
            Firmware::EfiBc => 3,
            Firmware::BiosIpxe => 4,
            Firmware::ChainloadedIpxe => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Machine {
    pub mac: MacAddr,
    pub arch: Arch,
    pub firmware: Firmware,
}

/// What a `Machine` should boot. Produced by a `Booter`.
#[derive(Debug, Clone, Default)]
pub struct BootSpec {
    pub kernel: Option<String>,
    pub initrd: Vec<String>,
    pub cmdline: Option<String>,
    pub message: Option<String>,
    /// A literal iPXE script, overriding kernel/initrd/cmdline/message.
    pub ipxe_script: Option<String>,
}

/// Capability a host supplies to decide what a machine should boot and to
/// serve the artifact bytes.
pub trait Booter: Send + Sync {
    fn boot_spec(&self, machine: &Machine) -> Result<Option<BootSpec>, BooterError>;
    fn read_boot_file(&self, id: &str) -> Result<(Box<dyn std::io::Read + Send>, i64), BooterError>;
    fn write_boot_file(
        &self,
        id: &str,
        stream: &mut dyn std::io::Read,
    ) -> Result<(), BooterError>;
}

/// Classify a packet already known to be a DISCOVER carrying option 93.
///
/// `enable_ipxe` gates the user-class reclassification into `BiosIpxe`/
/// `ChainloadedIpxe`: when false, option 93 alone decides firmware class and
/// every arch-0 client is plain `BiosPxe`, matching §6's `enable_ipxe: if
/// false, never emit iPXE redirects; only serve the plain PXE filename`.
pub fn classify(packet: &DhcpPacket, enable_ipxe: bool) -> Result<Machine, ProtocolError> {
    let arch_code = dhcp::client_arch(packet)?.ok_or(ProtocolError::NotPxeBootRequest)?;

    let (arch, mut firmware) = match arch_code {
        0 => (Arch::IA32, Firmware::BiosPxe),
        6 => (Arch::IA32, Firmware::Efi32),
        7 => (Arch::X64, Firmware::Efi64),
        9 => (Arch::X64, Firmware::EfiBc),
        other => return Err(ProtocolError::UnsupportedFirmware(other)),
    };

    if enable_ipxe {
        if let Some(user_class) = dhcp::user_class(packet) {
            if user_class == "iPXE" && firmware == Firmware::BiosPxe {
                firmware = Firmware::BiosIpxe;
            }
            if user_class == "pixiecore" {
                firmware = Firmware::ChainloadedIpxe;
            }
        }
    }

    // Validated for its side effect (rejects malformed GUIDs); the value
    // itself is only ever mirrored back into the reply, never branched on.
    dhcp::client_guid(packet)?;

    Ok(Machine {
        mac: packet.chaddr,
        arch,
        firmware,
    })
}

/// Whether a DISCOVER is boot-related: option 93 present (§4.D).
pub fn is_boot_request(packet: &DhcpPacket) -> bool {
    packet.options.contains_key(&93)
}

/// Builds the PXE-specific options (43, 54, 60, mirrored 97, and
/// `BootServerName`/`BootFilename` via `sname`/`file`) onto an in-progress
/// OFFER/ACK reply, per firmware class. `pxe_file` is the configured TFTP
/// filename advertised to a plain `BiosPxe` client (§6); other firmware
/// classes use the computed `<hwaddr>/<fwtype>` or redirect-URL form, none
/// of which depend on it.
pub fn apply_boot_options(
    reply: &mut DhcpPacket,
    request: &DhcpPacket,
    machine: &Machine,
    server_ip: Ipv4Addr,
    http_port: u16,
    pxe_file: &str,
) {
    reply.set_option(54, server_ip.octets().to_vec());
    reply.set_option(60, b"PXEClient".to_vec());
    if let Some(guid) = request.options.get(&97) {
        reply.set_option(97, guid.clone());
    }

    let mac = machine.mac;
    let fwtype = machine.firmware.wire_value();

    match machine.firmware {
        Firmware::BiosPxe => {
            reply.set_option(43, vec![6, 1, 8]);
            reply.sname = server_ip.to_string();
            reply.file = pxe_file.to_string();
        }
        Firmware::BiosIpxe => {
            reply.set_option(43, vec![6, 1, 8]);
            reply.file = format!("tftp://{server_ip}/{mac}/{fwtype}");
        }
        Firmware::Efi32 | Firmware::Efi64 | Firmware::EfiBc => {
            reply.sname = server_ip.to_string();
            reply.file = format!("{mac}/{fwtype}");
        }
        Firmware::ChainloadedIpxe => {
            reply.file = format!(
                "http://{server_ip}:{http_port}/_/ipxe?arch={}&mac={mac}",
                machine_arch_wire(machine.arch)
            );
        }
    }
}

fn machine_arch_wire(arch: Arch) -> u16 {
    match arch {
        Arch::IA32 => 0,
        Arch::X64 => 7,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dhcp::packet::OP_BOOTREQUEST;
    use std::net::Ipv4Addr;

    fn discover(arch: u16, user_class: Option<&str>) -> DhcpPacket {
        let mut p = DhcpPacket::new_reply(
            OP_BOOTREQUEST,
            0x11223344,
            0,
            Ipv4Addr::UNSPECIFIED,
            MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
        );
        p.set_option(53, vec![1]);
        p.set_option(93, arch.to_be_bytes().to_vec());
        if let Some(uc) = user_class {
            p.set_option(77, uc.as_bytes().to_vec());
        }
        p
    }

    #[test]
    fn classifies_bios_pxe() {
        let m = classify(&discover(0, None), true).unwrap();
        assert_eq!(m.firmware, Firmware::BiosPxe);
        assert_eq!(m.arch, Arch::IA32);
    }

    #[test]
    fn classifies_bios_ipxe() {
        let m = classify(&discover(0, Some("iPXE")), true).unwrap();
        assert_eq!(m.firmware, Firmware::BiosIpxe);
    }

    #[test]
    fn classifies_chainloaded_ipxe() {
        let m = classify(&discover(0, Some("pixiecore")), true).unwrap();
        assert_eq!(m.firmware, Firmware::ChainloadedIpxe);
    }

    #[test]
    fn classifies_uefi_x64() {
        let m = classify(&discover(7, None), true).unwrap();
        assert_eq!(m.firmware, Firmware::Efi64);
        assert_eq!(m.arch, Arch::X64);
    }

    #[test]
    fn rejects_unsupported_arch() {
        assert!(matches!(
            classify(&discover(99, None), true),
            Err(ProtocolError::UnsupportedFirmware(99))
        ));
    }

    #[test]
    fn bios_pxe_offer_has_vendor_option_and_configured_filename() {
        let request = discover(0, None);
        let machine = classify(&request, true).unwrap();
        let mut reply = DhcpPacket::new_reply(
            dhcp::OP_BOOTREPLY,
            request.xid,
            0,
            Ipv4Addr::UNSPECIFIED,
            machine.mac,
        );
        apply_boot_options(
            &mut reply,
            &request,
            &machine,
            Ipv4Addr::new(192, 168, 1, 1),
            80,
            "pxelinux.0",
        );
        assert_eq!(reply.options.get(&43), Some(&vec![6, 1, 8]));
        assert_eq!(reply.sname, "192.168.1.1");
        assert_eq!(reply.file, "pxelinux.0");
    }

    #[test]
    fn chainloaded_ipxe_offer_redirects_to_http() {
        let request = discover(0, Some("pixiecore"));
        let machine = classify(&request, true).unwrap();
        let mut reply = DhcpPacket::new_reply(
            dhcp::OP_BOOTREPLY,
            request.xid,
            0,
            Ipv4Addr::UNSPECIFIED,
            machine.mac,
        );
        apply_boot_options(
            &mut reply,
            &request,
            &machine,
            Ipv4Addr::new(192, 168, 1, 1),
            80,
            "pxelinux.0",
        );
        assert_eq!(
            reply.file,
            "http://192.168.1.1:80/_/ipxe?arch=0&mac=aa:bb:cc:dd:ee:01"
        );
    }

    #[test]
    fn enable_ipxe_false_suppresses_user_class_reclassification() {
        let request = discover(0, Some("iPXE"));
        let machine = classify(&request, false).unwrap();
        assert_eq!(machine.firmware, Firmware::BiosPxe);
    }
}
