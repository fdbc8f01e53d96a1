//! Process-wide logger init plus the per-machine boot-event log the
//! orchestrator owns.

use crate::net_types::MacAddr;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Installs `env_logger` once. `RUST_LOG` controls verbosity; defaults to
/// `info` when unset.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootEvent {
    ProxyDhcpOffer,
    PxeOffer,
    TftpSent,
    IpxeScriptSent,
    KernelSent,
    InitrdSent,
    Booted,
    Ignored,
}

impl BootEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            BootEvent::ProxyDhcpOffer => "ProxyDhcpOffer",
            BootEvent::PxeOffer => "PxeOffer",
            BootEvent::TftpSent => "TftpSent",
            BootEvent::IpxeScriptSent => "IpxeScriptSent",
            BootEvent::KernelSent => "KernelSent",
            BootEvent::InitrdSent => "InitrdSent",
            BootEvent::Booted => "Booted",
            BootEvent::Ignored => "Ignored",
        }
    }
}

const HISTORY_LEN: usize = 10;

/// Bounded-per-MAC ring of the last `HISTORY_LEN` boot lifecycle events,
/// so an operator can answer "what stage did this machine reach" without
/// grepping logs.
pub struct BootEventLog {
    history: Mutex<HashMap<MacAddr, VecDeque<(BootEvent, String)>>>,
}

impl Default for BootEventLog {
    fn default() -> Self {
        BootEventLog {
            history: Mutex::new(HashMap::new()),
        }
    }
}

impl BootEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, mac: MacAddr, event: BootEvent, detail: impl Into<String>) {
        let mut guard = self.history.lock().unwrap();
        let entries = guard.entry(mac).or_default();
        if entries.len() == HISTORY_LEN {
            entries.pop_front();
        }
        entries.push_back((event, detail.into()));
    }

    pub fn history_for(&self, mac: MacAddr) -> Vec<(BootEvent, String)> {
        self.history
            .lock()
            .unwrap()
            .get(&mac)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn caps_history_at_ten_entries() {
        let log = BootEventLog::new();
        let mac = MacAddr::new([1; 6]);
        for i in 0..15 {
            log.record(mac, BootEvent::Ignored, format!("entry {i}"));
        }
        assert_eq!(log.history_for(mac).len(), HISTORY_LEN);
        assert_eq!(log.history_for(mac).last().unwrap().1, "entry 14");
    }
}
