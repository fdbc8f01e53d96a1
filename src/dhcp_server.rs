//! Full DHCP server and ProxyDHCP/snooper responder.
//!
//! A single socket-reading loop processes packets strictly in arrival
//! order, which is what guarantees replies to one hardware address are
//! serialized DISCOVER-before-REQUEST-before-renewal: there is exactly one
//! reader per listener and no per-packet fan-out.

use crate::boot::{self, Booter, Machine};
use crate::config::{Config, ServerMode};
use crate::dhcp::{self, DhcpPacket, OP_BOOTREPLY, OP_BOOTREQUEST};
use crate::lease::LeaseAllocator;
use crate::logging::{BootEvent, BootEventLog};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MSG_DISCOVER: u8 = 1;
pub const MSG_OFFER: u8 = 2;
pub const MSG_REQUEST: u8 = 3;
pub const MSG_DECLINE: u8 = 4;
pub const MSG_ACK: u8 = 5;
pub const MSG_NAK: u8 = 6;
pub const MSG_RELEASE: u8 = 7;

pub struct DhcpServer {
    socket: UdpSocket,
    config: Arc<Config>,
    leases: Arc<LeaseAllocator>,
    booter: Arc<dyn Booter>,
    events: Arc<BootEventLog>,
    shutdown: Arc<AtomicBool>,
}

impl DhcpServer {
    pub fn bind(
        config: Arc<Config>,
        leases: Arc<LeaseAllocator>,
        booter: Arc<dyn Booter>,
        events: Arc<BootEventLog>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, crate::error::BindError> {
        let addr = SocketAddr::new(config.listen_ip.into(), config.dhcp_port);
        let socket = match config.mode {
            ServerMode::Dhcp => UdpSocket::bind(addr),
            ServerMode::Proxy => bind_reuse_addr(addr),
        }
        .map_err(|source| crate::error::BindError::Bind {
            service: "DHCP",
            addr: addr.to_string(),
            source,
        })?;
        socket.set_broadcast(true).ok();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .ok();
        Ok(DhcpServer {
            socket,
            config,
            leases,
            booter,
            events,
            shutdown,
        })
    }

    /// Blocking receive loop; returns once `shutdown` is observed true.
    pub fn run(&self) -> std::io::Result<()> {
        let mut buf = [0u8; 4096];
        while !self.shutdown.load(Ordering::Relaxed) {
            let (n, src) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) => return Err(e),
            };
            self.handle_datagram(&buf[0..n], src);
        }
        Ok(())
    }

    fn handle_datagram(&self, buf: &[u8], src: SocketAddr) {
        let packet = match DhcpPacket::parse(buf) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("[DHCP] dropping malformed packet from {src}: {e}");
                return;
            }
        };
        if packet.op != OP_BOOTREQUEST {
            return;
        }
        let Some(msg_type) = packet.message_type() else {
            log::debug!("[DHCP] packet from {src} has no message type option, ignoring");
            return;
        };

        log::info!(
            "[DHCP] xid=0x{:08x} type={} from {}",
            packet.xid,
            msg_type,
            packet.chaddr
        );

        match self.config.mode {
            ServerMode::Dhcp => self.handle_full_server(&packet, msg_type),
            ServerMode::Proxy => self.handle_proxy(&packet, msg_type),
        }
    }

    fn handle_full_server(&self, packet: &DhcpPacket, msg_type: u8) {
        match msg_type {
            MSG_DISCOVER => self.on_discover(packet),
            MSG_REQUEST => self.on_request(packet),
            MSG_RELEASE => {
                self.leases.release(packet.chaddr);
            }
            MSG_DECLINE => {
                self.leases.release(packet.chaddr);
            }
            _ => {}
        }
    }

    fn on_discover(&self, packet: &DhcpPacket) {
        let lease = match self.leases.allocate_for(packet.chaddr) {
            Ok(l) => l,
            Err(e) => {
                log::warn!(
                    "[DHCP] xid=0x{:08x} no address available: {e}",
                    packet.xid
                );
                return;
            }
        };

        let mut reply = self.base_reply(packet, OP_BOOTREPLY);
        reply.yiaddr = lease.ip;
        reply.set_option(53, vec![MSG_OFFER]);
        self.apply_common_options(&mut reply);

        if dhcp::is_pxe_client(packet) {
            if let Ok(machine) = boot::classify(packet, self.config.enable_ipxe) {
                self.apply_pxe_offer(&mut reply, packet, &machine);
            }
        }
        self.finish_and_send(&reply, packet);
    }

    fn on_request(&self, packet: &DhcpPacket) {
        let requested_ip = packet
            .options
            .get(&50)
            .and_then(|v| <[u8; 4]>::try_from(v.as_slice()).ok())
            .map(Ipv4Addr::from)
            .unwrap_or(packet.ciaddr);

        let lease = match self.leases.confirm(packet.chaddr, requested_ip) {
            Ok(l) => l,
            Err(e) => {
                log::warn!(
                    "[DHCP] xid=0x{:08x} NAK {} to {}: {e}",
                    packet.xid,
                    requested_ip,
                    packet.chaddr
                );
                let mut nak = self.base_reply(packet, OP_BOOTREPLY);
                nak.set_option(53, vec![MSG_NAK]);
                nak.set_option(54, self.config.service_ip.octets().to_vec());
                self.finish_and_send(&nak, packet);
                return;
            }
        };

        let mut reply = self.base_reply(packet, OP_BOOTREPLY);
        reply.yiaddr = lease.ip;
        reply.set_option(53, vec![MSG_ACK]);
        self.apply_common_options(&mut reply);

        if dhcp::is_pxe_client(packet) {
            if let Ok(machine) = boot::classify(packet, self.config.enable_ipxe) {
                self.apply_pxe_offer(&mut reply, packet, &machine);
            }
        }
        self.finish_and_send(&reply, packet);
    }

    fn handle_proxy(&self, packet: &DhcpPacket, msg_type: u8) {
        if msg_type != MSG_DISCOVER || !boot::is_boot_request(packet) {
            return;
        }
        let machine = match boot::classify(packet, self.config.enable_ipxe) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("[DHCP] xid=0x{:08x} unusable boot packet: {e}", packet.xid);
                return;
            }
        };

        let mut reply = self.base_reply(packet, OP_BOOTREPLY);
        reply.yiaddr = Ipv4Addr::UNSPECIFIED;
        reply.siaddr = self.config.service_ip;
        reply.set_option(53, vec![MSG_OFFER]);
        reply.set_option(54, self.config.service_ip.octets().to_vec());
        reply.set_option(60, b"PXEClient".to_vec());
        self.apply_pxe_offer(&mut reply, packet, &machine);

        self.events.record(
            machine.mac,
            BootEvent::ProxyDhcpOffer,
            format!("xid=0x{:08x}", packet.xid),
        );
        self.finish_and_send(&reply, packet);
    }

    fn base_reply(&self, packet: &DhcpPacket, op: u8) -> DhcpPacket {
        let mut reply =
            DhcpPacket::new_reply(op, packet.xid, packet.flags, packet.giaddr, packet.chaddr);
        if let Some(prl) = packet.options.get(&55) {
            reply.set_option(55, prl.clone());
        }
        reply
    }

    fn apply_common_options(&self, reply: &mut DhcpPacket) {
        reply.set_option(54, self.config.service_ip.octets().to_vec());
        reply.set_option(1, self.config.netmask.octets().to_vec());
        reply.set_option(3, self.config.router.octets().to_vec());
        reply.set_option(6, self.config.dns_server.octets().to_vec());
        let secs = self.config.lease_duration.as_secs();
        if secs > 0 {
            reply.set_option(51, (secs as u32).to_be_bytes().to_vec());
        }
    }

    fn apply_pxe_offer(&self, reply: &mut DhcpPacket, request: &DhcpPacket, machine: &Machine) {
        match self.booter.boot_spec(machine) {
            Ok(Some(_spec)) => {
                boot::apply_boot_options(
                    reply,
                    request,
                    machine,
                    self.config.service_ip,
                    self.config.http_port,
                    &self.config.pxe_file,
                );
                if dhcp::is_pxe_client(request) {
                    reply.set_option(66, reply.sname.clone().into_bytes());
                    reply.set_option(67, reply.file.clone().into_bytes());
                }
                self.events.record(
                    machine.mac,
                    BootEvent::PxeOffer,
                    format!("firmware={:?}", machine.firmware),
                );
            }
            Ok(None) => {
                self.events
                    .record(machine.mac, BootEvent::Ignored, "no boot spec");
            }
            Err(e) => {
                log::warn!("[DHCP] booter error for {}: {e}", machine.mac);
            }
        }
    }

    fn finish_and_send(&self, reply: &DhcpPacket, request: &DhcpPacket) {
        let wire = reply.serialize();
        let dest = if request.giaddr != Ipv4Addr::UNSPECIFIED {
            SocketAddr::new(request.giaddr.into(), 67)
        } else {
            SocketAddr::new(Ipv4Addr::BROADCAST.into(), 68)
        };
        if let Err(e) = self.socket.send_to(&wire, dest) {
            log::warn!(
                "[DHCP] xid=0x{:08x} failed to send reply to {dest}: {e}",
                request.xid
            );
        }
    }
}

/// ProxyDHCP/snooper mode listens on :67 without exclusively owning the
/// address, so it can coexist with a real DHCP server. `SO_REUSEADDR` is
/// what makes that possible; `Config::from_raw` already rejects
/// `mode: proxy` on non-Linux targets, so the plain bind below is only ever
/// reached there as a dead branch kept for portability of the match arm in
/// `DhcpServer::bind`.
#[cfg(target_os = "linux")]
fn bind_reuse_addr(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    use nix::sys::socket::{
        bind, setsockopt, socket, sockopt::ReuseAddr, AddressFamily, SockFlag, SockType,
        SockaddrIn,
    };
    use std::os::fd::FromRawFd;

    let fd = socket(AddressFamily::Inet, SockType::Datagram, SockFlag::empty(), None)?;
    setsockopt(&fd, ReuseAddr, &true)?;
    let sockaddr: SockaddrIn = match addr {
        SocketAddr::V4(v4) => SockaddrIn::from(v4),
        SocketAddr::V6(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "IPv6 not supported",
            ))
        }
    };
    bind(std::os::fd::AsRawFd::as_raw_fd(&fd), &sockaddr)?;
    Ok(unsafe { UdpSocket::from_raw_fd(std::os::fd::IntoRawFd::into_raw_fd(fd)) })
}

#[cfg(not(target_os = "linux"))]
fn bind_reuse_addr(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(addr)
}
