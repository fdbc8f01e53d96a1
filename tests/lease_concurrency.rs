//! Concurrent allocation invariant: no two in-flight leases share an IP,
//! even when many hardware addresses race for the same small range.

use netbootd::lease::LeaseAllocator;
use netbootd::net_types::MacAddr;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn concurrent_allocate_and_confirm_never_double_assigns() {
    let allocator = Arc::new(
        LeaseAllocator::with_seed(
            Ipv4Addr::new(192, 168, 1, 100),
            Ipv4Addr::new(192, 168, 1, 120),
            Duration::from_secs(86400),
            None,
            42,
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..21u8)
        .map(|i| {
            let allocator = allocator.clone();
            std::thread::spawn(move || {
                let mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, i]);
                let tentative = allocator.allocate_for(mac).unwrap();
                allocator.confirm(mac, tentative.ip).unwrap()
            })
        })
        .collect();

    let mut assigned = HashSet::new();
    for handle in handles {
        let lease = handle.join().unwrap();
        assert!(
            assigned.insert(lease.ip),
            "address {} was assigned to more than one client",
            lease.ip
        );
        let start = u32::from(Ipv4Addr::new(192, 168, 1, 100));
        let end = u32::from(Ipv4Addr::new(192, 168, 1, 120));
        let candidate = u32::from(lease.ip);
        assert!(candidate >= start && candidate <= end);
    }
    assert_eq!(assigned.len(), 21);
}

#[test]
fn one_more_client_than_range_capacity_is_refused() {
    let allocator = Arc::new(
        LeaseAllocator::with_seed(
            Ipv4Addr::new(192, 168, 1, 100),
            Ipv4Addr::new(192, 168, 1, 104),
            Duration::from_secs(86400),
            None,
            9,
        )
        .unwrap(),
    );

    for i in 0..5u8 {
        let mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, i]);
        let lease = allocator.allocate_for(mac).unwrap();
        allocator.confirm(mac, lease.ip).unwrap();
    }

    let overflow_mac = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    assert!(allocator.allocate_for(overflow_mac).is_err());
}
