//! UEFI follow-up boot server discovery on UDP 4011 (BINL-like).
//!
//! EFI firmware classes get no option 43 in the ProxyDHCP offer, so most
//! UEFI stacks re-contact the server here instead. A request on this port
//! is answered with a DHCP ACK whose `BootServerName`/`BootFilename` point
//! at the TFTP-served iPXE binary for the client's firmware class.

use crate::boot::{Firmware, Machine};
use crate::booter_fs::artifact_exists;
use crate::config::Config;
use crate::dhcp::{self, DhcpPacket, OP_BOOTREPLY, OP_BOOTREQUEST};
use crate::error::ProtocolError;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Pxe4011Responder {
    socket: UdpSocket,
    config: Arc<Config>,
    shutdown: Arc<AtomicBool>,
}

impl Pxe4011Responder {
    pub fn bind(config: Arc<Config>, shutdown: Arc<AtomicBool>) -> Result<Self, crate::error::BindError> {
        let addr = SocketAddr::new(config.listen_ip.into(), 4011);
        let socket = UdpSocket::bind(addr).map_err(|source| crate::error::BindError::Bind {
            service: "PXE-4011",
            addr: addr.to_string(),
            source,
        })?;
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .ok();
        Ok(Pxe4011Responder {
            socket,
            config,
            shutdown,
        })
    }

    pub fn run(&self) -> std::io::Result<()> {
        #[cfg(target_os = "linux")]
        {
            let _ = nix::sys::socket::setsockopt(
                &self.socket,
                nix::sys::socket::sockopt::Ipv4PacketInfo,
                &true,
            );
        }
        let mut buf = [0u8; 4096];
        while !self.shutdown.load(Ordering::Relaxed) {
            let (n, src, pktinfo_addr) = match self.recv(&mut buf) {
                Ok(v) => v,
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) => return Err(e),
            };
            self.handle_datagram(&buf[0..n], src, pktinfo_addr);
        }
        Ok(())
    }

    /// Receives one datagram, returning the source address and (on Linux)
    /// the local interface address it arrived on via `IP_PKTINFO` ancillary
    /// data captured on the *same* `recvmsg` call — a separate follow-up
    /// call would either block waiting for an unrelated packet or report
    /// the wrong interface for this one.
    #[cfg(target_os = "linux")]
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr, Option<Ipv4Addr>)> {
        use nix::cmsg_space;
        use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags, SockaddrIn};
        use std::io::IoSliceMut;
        use std::os::fd::AsRawFd;

        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg_buf = cmsg_space!(libc::in_pktinfo);
        let msg = recvmsg::<SockaddrIn>(
            self.socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        )
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;

        let n = msg.bytes;
        let src = msg
            .address
            .map(|a| SocketAddr::V4(std::net::SocketAddrV4::new(a.ip().into(), a.port())))
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "no source address"))?;

        let mut pktinfo_addr = None;
        if let Ok(cmsgs) = msg.cmsgs() {
            for cmsg in cmsgs {
                if let ControlMessageOwned::Ipv4PacketInfo(pktinfo) = cmsg {
                    pktinfo_addr = Some(Ipv4Addr::from(u32::from_be(pktinfo.ipi_addr.s_addr)));
                }
            }
        }
        Ok((n, src, pktinfo_addr))
    }

    #[cfg(not(target_os = "linux"))]
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr, Option<Ipv4Addr>)> {
        let (n, src) = self.socket.recv_from(buf)?;
        Ok((n, src, None))
    }

    fn handle_datagram(&self, buf: &[u8], src: SocketAddr, pktinfo_addr: Option<Ipv4Addr>) {
        let packet = match DhcpPacket::parse(buf) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("[PXE] packet from {src} is not DHCP: {e}");
                return;
            }
        };
        if packet.op != OP_BOOTREQUEST {
            return;
        }

        let machine = match validate(&packet) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("[PXE] xid=0x{:08x} unusable packet from {src}: {e}", packet.xid);
                return;
            }
        };

        let artifact = format!("{}/{}", machine.mac, machine.firmware.wire_value());
        if !artifact_exists(&self.config.tftp_root, &artifact) {
            log::debug!(
                "[PXE] xid=0x{:08x} no loadable iPXE binary for {} ({artifact}), ignoring",
                packet.xid,
                machine.mac
            );
            return;
        }

        let source_ip = pktinfo_addr.unwrap_or(self.config.service_ip);
        let reply = build_reply(&packet, &machine, source_ip);
        let wire = reply.serialize();
        if let Err(e) = self.socket.send_to(&wire, src) {
            log::warn!("[PXE] xid=0x{:08x} failed to reply to {src}: {e}", packet.xid);
        }
    }
}

fn validate(packet: &DhcpPacket) -> Result<Machine, ProtocolError> {
    let arch_code = dhcp::client_arch(packet)?.ok_or(ProtocolError::NotPxeBootRequest)?;
    let firmware = match arch_code {
        6 => Firmware::Efi32,
        7 => Firmware::Efi64,
        9 => Firmware::EfiBc,
        other => return Err(ProtocolError::UnsupportedFirmware(other)),
    };
    dhcp::client_guid(packet)?;
    let arch = match firmware {
        Firmware::Efi32 => crate::boot::Arch::IA32,
        _ => crate::boot::Arch::X64,
    };
    Ok(Machine {
        mac: packet.chaddr,
        arch,
        firmware,
    })
}

fn build_reply(request: &DhcpPacket, machine: &Machine, server_ip: Ipv4Addr) -> DhcpPacket {
    let mut reply = DhcpPacket::new_reply(
        OP_BOOTREPLY,
        request.xid,
        request.flags,
        request.giaddr,
        request.chaddr,
    );
    reply.ciaddr = request.ciaddr;
    reply.siaddr = server_ip;
    reply.set_option(53, vec![crate::dhcp_server::MSG_ACK]);
    reply.set_option(54, server_ip.octets().to_vec());
    reply.set_option(60, b"PXEClient".to_vec());
    if let Some(guid) = request.options.get(&97) {
        reply.set_option(97, guid.clone());
    }
    reply.sname = server_ip.to_string();
    reply.file = format!("{}/{}", machine.mac, machine.firmware.wire_value());
    reply
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net_types::MacAddr;
    use std::net::Ipv4Addr;

    fn discover(arch: u16) -> DhcpPacket {
        let mut p = DhcpPacket::new_reply(
            OP_BOOTREQUEST,
            0xaabbccdd,
            0,
            Ipv4Addr::UNSPECIFIED,
            MacAddr::new([1, 2, 3, 4, 5, 6]),
        );
        p.set_option(53, vec![1]);
        p.set_option(93, arch.to_be_bytes().to_vec());
        p
    }

    #[test]
    fn validates_efi64() {
        let machine = validate(&discover(7)).unwrap();
        assert_eq!(machine.firmware, Firmware::Efi64);
    }

    #[test]
    fn rejects_bios_arch_at_4011() {
        assert!(validate(&discover(0)).is_err());
    }

    #[test]
    fn reply_points_at_tftp_filename() {
        let request = discover(7);
        let machine = validate(&request).unwrap();
        let reply = build_reply(&request, &machine, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(reply.sname, "192.168.1.1");
        assert_eq!(reply.file, "01:02:03:04:05:06/2");
    }
}
