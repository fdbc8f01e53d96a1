//! IPv4 lease allocation: hardware address to lease mapping, with optional
//! append-only file persistence.

use crate::error::ResourceExhaustion;
use crate::net_types::MacAddr;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub hwaddr: MacAddr,
    pub ip: Ipv4Addr,
    pub expiry: SystemTime,
}

impl Lease {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiry <= now
    }
}

struct Inner {
    table: HashMap<MacAddr, Lease>,
    rng: StdRng,
}

/// Maps hardware addresses to leases within a configured IPv4 range. Every
/// read-modify-write sequence runs under one lock acquisition; there is no
/// "check then use" outside it.
pub struct LeaseAllocator {
    inner: Mutex<Inner>,
    range_start: Ipv4Addr,
    range_end: Ipv4Addr,
    lease_duration: Duration,
    lease_file: Option<PathBuf>,
}

impl LeaseAllocator {
    pub fn new(
        range_start: Ipv4Addr,
        range_end: Ipv4Addr,
        lease_duration: Duration,
        lease_file: Option<PathBuf>,
    ) -> Result<Self, crate::error::ConfigError> {
        Self::with_seed(
            range_start,
            range_end,
            lease_duration,
            lease_file,
            rand::thread_rng().gen(),
        )
    }

    /// Construct with an explicit PRNG seed, so collision behavior is
    /// reproducible in tests.
    pub fn with_seed(
        range_start: Ipv4Addr,
        range_end: Ipv4Addr,
        lease_duration: Duration,
        lease_file: Option<PathBuf>,
        seed: u64,
    ) -> Result<Self, crate::error::ConfigError> {
        let mut table = HashMap::new();
        if let Some(path) = &lease_file {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|source| {
                    crate::error::ConfigError::Read {
                        path: path.clone(),
                        source,
                    }
                })?;
                table = replay_lease_file(&text)?;
            }
        }
        Ok(LeaseAllocator {
            inner: Mutex::new(Inner {
                table,
                rng: StdRng::seed_from_u64(seed),
            }),
            range_start,
            range_end,
            lease_duration,
            lease_file,
        })
    }

    /// Returns an existing unexpired lease for `hwaddr`, or allocates a
    /// fresh tentative lease (`expiry = now`) from the range.
    pub fn allocate_for(&self, hwaddr: MacAddr) -> Result<Lease, ResourceExhaustion> {
        let now = SystemTime::now();
        let mut guard = self.inner.lock().unwrap();

        if let Some(existing) = guard.table.get(&hwaddr) {
            if !existing.is_expired(now) {
                return Ok(*existing);
            }
        }

        let start = u32::from(self.range_start);
        let end = u32::from(self.range_end);
        let seed = guard.rng.gen_range(start..=end);

        let is_taken = |table: &HashMap<MacAddr, Lease>, candidate: u32| -> bool {
            let candidate_ip = Ipv4Addr::from(candidate);
            table
                .values()
                .any(|l| l.ip == candidate_ip && !l.is_expired(now))
        };

        let mut chosen = None;
        let mut cursor = seed;
        loop {
            if !is_taken(&guard.table, cursor) {
                chosen = Some(cursor);
                break;
            }
            if cursor == end {
                break;
            }
            cursor += 1;
        }
        if chosen.is_none() {
            cursor = seed;
            loop {
                if cursor == start {
                    break;
                }
                cursor -= 1;
                if !is_taken(&guard.table, cursor) {
                    chosen = Some(cursor);
                    break;
                }
            }
        }

        let ip = match chosen {
            Some(v) => Ipv4Addr::from(v),
            None => {
                return Err(ResourceExhaustion::NoAddress {
                    start: self.range_start.to_string(),
                    end: self.range_end.to_string(),
                })
            }
        };

        let lease = Lease {
            hwaddr,
            ip,
            expiry: now,
        };
        guard.table.insert(hwaddr, lease);
        Ok(lease)
    }

    /// Promotes a tentative (or expired) lease to a confirmed one with
    /// `expiry = now + lease_duration`, persisting if file-backed. Per §4.A,
    /// this requires an existing entry for `hwaddr` with a matching IP, or
    /// no entry at all; it also refuses an IP another (unexpired) hardware
    /// address already holds, so the §3 one-IP-per-lease invariant holds
    /// even when a REQUEST's option 50 disagrees with the allocator's own
    /// records.
    pub fn confirm(&self, hwaddr: MacAddr, ip: Ipv4Addr) -> Result<Lease, crate::error::ConfirmError> {
        use crate::error::ConfirmError;

        let now = SystemTime::now();
        let expiry = now + self.lease_duration;
        let lease = Lease { hwaddr, ip, expiry };
        {
            let mut guard = self.inner.lock().unwrap();

            if let Some(existing) = guard.table.get(&hwaddr) {
                if existing.ip != ip {
                    return Err(ConfirmError::Mismatch {
                        expected: existing.ip.to_string(),
                        requested: ip.to_string(),
                    });
                }
            }

            let held_by_other = guard
                .table
                .values()
                .any(|l| l.hwaddr != hwaddr && l.ip == ip && !l.is_expired(now));
            if held_by_other {
                return Err(ConfirmError::AddressInUse(ip.to_string()));
            }

            guard.table.insert(hwaddr, lease);
        }
        self.persist(&lease);
        Ok(lease)
    }

    pub fn renew(&self, hwaddr: MacAddr) -> Option<Lease> {
        let mut guard = self.inner.lock().unwrap();
        let lease = guard.table.get_mut(&hwaddr)?;
        lease.expiry = SystemTime::now() + self.lease_duration;
        Some(*lease)
    }

    pub fn release(&self, hwaddr: MacAddr) {
        let mut guard = self.inner.lock().unwrap();
        guard.table.remove(&hwaddr);
    }

    /// Removes all entries whose expiry has already passed. Called
    /// opportunistically; never on a timer.
    pub fn prune(&self) {
        let now = SystemTime::now();
        let mut guard = self.inner.lock().unwrap();
        guard.table.retain(|_, l| !l.is_expired(now));
    }

    /// Entries are appended only; the file is never rewritten or compacted,
    /// so renewals do not update a prior line (matches the lineage this was
    /// ported from).
    fn persist(&self, lease: &Lease) {
        let Some(path) = &self.lease_file else {
            return;
        };
        let timestamp: DateTime<Utc> = lease.expiry.into();
        let line = format!(
            "{} {} {}\n",
            lease.hwaddr,
            lease.ip,
            timestamp.to_rfc3339()
        );
        match OpenOptions::new().append(true).create(true).open(path) {
            Ok(mut f) => {
                if let Err(e) = f.write_all(line.as_bytes()) {
                    log::warn!("[DHCP] failed to append lease record to {path:?}: {e}");
                }
            }
            Err(e) => log::warn!("[DHCP] failed to open lease file {path:?}: {e}"),
        }
    }
}

fn replay_lease_file(
    text: &str,
) -> Result<HashMap<MacAddr, Lease>, crate::error::ConfigError> {
    let mut table = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(crate::error::ConfigError::LeaseFile {
                line: lineno + 1,
                reason: format!("expected 3 fields, got {}", fields.len()),
            });
        }
        let hwaddr: MacAddr = fields[0]
            .parse()
            .map_err(|_| crate::error::ConfigError::LeaseFile {
                line: lineno + 1,
                reason: format!("malformed hardware address: {}", fields[0]),
            })?;
        let ip: Ipv4Addr = fields[1].parse().map_err(|_| {
            crate::error::ConfigError::LeaseFile {
                line: lineno + 1,
                reason: format!("malformed IPv4 address: {}", fields[1]),
            }
        })?;
        let expiry: DateTime<Utc> = DateTime::parse_from_rfc3339(fields[2])
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| crate::error::ConfigError::LeaseFile {
                line: lineno + 1,
                reason: format!("malformed RFC3339 timestamp: {}", fields[2]),
            })?;
        table.insert(
            hwaddr,
            Lease {
                hwaddr,
                ip,
                expiry: expiry.into(),
            },
        );
    }
    Ok(table)
}
