//! End-to-end scenarios from the boot decision engine's spec, driving the
//! DHCP codec, lease allocator and boot decision engine together without any
//! real socket I/O (§8 scenarios 1-5).

use netbootd::boot::{self, Firmware};
use netbootd::dhcp::{DhcpPacket, OP_BOOTREPLY, OP_BOOTREQUEST};
use netbootd::lease::LeaseAllocator;
use netbootd::net_types::MacAddr;
use std::net::Ipv4Addr;
use std::time::Duration;

const SERVICE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const HTTP_PORT: u16 = 80;

fn discover(xid: u32, mac: [u8; 6], opts: &[(u8, Vec<u8>)]) -> DhcpPacket {
    let mut p = DhcpPacket::new_reply(
        OP_BOOTREQUEST,
        xid,
        0,
        Ipv4Addr::UNSPECIFIED,
        MacAddr::new(mac),
    );
    p.set_option(53, vec![1]);
    for (code, value) in opts {
        p.set_option(*code, value.clone());
    }
    p
}

fn offer_for(request: &DhcpPacket, lease_ip: Ipv4Addr) -> DhcpPacket {
    let machine = boot::classify(request, true).unwrap();
    let mut reply = DhcpPacket::new_reply(
        OP_BOOTREPLY,
        request.xid,
        0,
        Ipv4Addr::UNSPECIFIED,
        machine.mac,
    );
    reply.yiaddr = lease_ip;
    reply.set_option(53, vec![2]);
    reply.set_option(54, SERVICE_IP.octets().to_vec());
    reply.set_option(51, 86400u32.to_be_bytes().to_vec());
    reply.set_option(66, SERVICE_IP.to_string().into_bytes());
    boot::apply_boot_options(&mut reply, request, &machine, SERVICE_IP, HTTP_PORT, "pxelinux.0");
    reply.set_option(67, reply.file.clone().into_bytes());
    reply
}

/// Scenario 1: classic BIOS PXE client gets the first free address in range
/// and a PXELINUX filename advertised over option 67.
#[test]
fn classic_bios_pxe_offer() {
    let leases = LeaseAllocator::with_seed(
        Ipv4Addr::new(192, 168, 1, 100),
        Ipv4Addr::new(192, 168, 1, 110),
        Duration::from_secs(86400),
        None,
        1,
    )
    .unwrap();

    let request = discover(
        0x11223344,
        [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01],
        &[(93, vec![0, 0]), (55, vec![1, 3, 6, 66, 67])],
    );
    let lease = leases.allocate_for(request.chaddr).unwrap();
    assert_eq!(lease.ip, Ipv4Addr::new(192, 168, 1, 100));

    let reply = offer_for(&request, lease.ip);
    let wire = reply.serialize();

    assert!(wire.len() >= 300);
    assert_eq!(reply.yiaddr, Ipv4Addr::new(192, 168, 1, 100));
    assert_eq!(reply.options.get(&54), Some(&SERVICE_IP.octets().to_vec()));
    assert_eq!(reply.options.get(&51), Some(&86400u32.to_be_bytes().to_vec()));
    assert_eq!(reply.options.get(&43), Some(&vec![6, 1, 8]));
    assert_eq!(reply.file, "pxelinux.0");
}

/// Scenario 2: iPXE chainload redirects to a `tftp://` URL rather than a
/// plain filename, carrying no server name.
#[test]
fn ipxe_chainload_redirects_over_tftp_url() {
    let request = discover(
        0x11223345,
        [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02],
        &[(93, vec![0, 0]), (77, b"iPXE".to_vec())],
    );
    let machine = boot::classify(&request, true).unwrap();
    assert_eq!(machine.firmware, Firmware::BiosIpxe);

    let mut reply = DhcpPacket::new_reply(
        OP_BOOTREPLY,
        request.xid,
        0,
        Ipv4Addr::UNSPECIFIED,
        machine.mac,
    );
    boot::apply_boot_options(&mut reply, &request, &machine, SERVICE_IP, HTTP_PORT, "pxelinux.0");
    assert_eq!(reply.file, "tftp://192.168.1.1/aa:bb:cc:dd:ee:02/4");
    assert!(reply.sname.is_empty());
}

/// Scenario 3: UEFI x64 gets a plain filename and no vendor option 43, since
/// it is expected to re-contact the server on port 4011.
#[test]
fn uefi_x64_offer_has_no_vendor_option() {
    let request = discover(0x11223346, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x03], &[(93, vec![0, 7])]);
    let machine = boot::classify(&request, true).unwrap();
    assert_eq!(machine.firmware, Firmware::Efi64);

    let mut reply = DhcpPacket::new_reply(
        OP_BOOTREPLY,
        request.xid,
        0,
        Ipv4Addr::UNSPECIFIED,
        machine.mac,
    );
    boot::apply_boot_options(&mut reply, &request, &machine, SERVICE_IP, HTTP_PORT, "pxelinux.0");
    assert_eq!(reply.sname, "192.168.1.1");
    assert_eq!(reply.file, "aa:bb:cc:dd:ee:03/2");
    assert!(!reply.options.contains_key(&43));
}

/// Scenario 4: a pixiecore-tagged chainloaded iPXE client is redirected
/// straight to the HTTP boot surface's `/_/ipxe` endpoint.
#[test]
fn chainloaded_ipxe_redirects_to_http_script() {
    let request = discover(
        0x11223347,
        [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x04],
        &[(93, vec![0, 0]), (77, b"pixiecore".to_vec())],
    );
    let machine = boot::classify(&request, true).unwrap();
    assert_eq!(machine.firmware, Firmware::ChainloadedIpxe);

    let mut reply = DhcpPacket::new_reply(
        OP_BOOTREPLY,
        request.xid,
        0,
        Ipv4Addr::UNSPECIFIED,
        machine.mac,
    );
    boot::apply_boot_options(&mut reply, &request, &machine, SERVICE_IP, HTTP_PORT, "pxelinux.0");
    assert_eq!(
        reply.file,
        "http://192.168.1.1:80/_/ipxe?arch=0&mac=aa:bb:cc:dd:ee:04"
    );
}

/// Scenario 5: with a single-address range exhausted by one confirmed
/// lease, a second machine's DISCOVER gets no address and no reply.
#[test]
fn lease_exhaustion_drops_second_client() {
    let leases = LeaseAllocator::with_seed(
        Ipv4Addr::new(192, 168, 1, 100),
        Ipv4Addr::new(192, 168, 1, 100),
        Duration::from_secs(86400),
        None,
        5,
    )
    .unwrap();

    let mac_a = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x05]);
    let mac_b = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x06]);

    let a_tentative = leases.allocate_for(mac_a).unwrap();
    let a_confirmed = leases.confirm(mac_a, a_tentative.ip).unwrap();
    assert_eq!(a_confirmed.ip, Ipv4Addr::new(192, 168, 1, 100));

    let b_result = leases.allocate_for(mac_b);
    assert!(b_result.is_err(), "second client must not receive an address");
}
