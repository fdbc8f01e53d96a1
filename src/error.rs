//! Error taxonomy, grouped by the subsystem that raises it, as `thiserror`
//! enums.
//!
//! Propagation policy: worker-local kinds (`ProtocolError`,
//! `ResourceExhaustion`, `TransferError`, `BooterError`) are logged at the
//! point they occur and never cross a thread boundary. `ConfigError` and
//! `BindError` are fatal at startup and are the only kinds that travel
//! through the orchestrator's error channel as `NetbootError`.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("missing required config key: {0}")]
    MissingField(&'static str),
    #[error("invalid IPv4 address for `{field}`: {value}")]
    InvalidIpv4 { field: &'static str, value: String },
    #[error("invalid IPv4 range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },
    #[error("invalid duration for `{field}`: {value}")]
    InvalidDuration { field: &'static str, value: String },
    #[error("ProxyDHCP (snooper) mode requires an unbound :67 listener, which is only supported on Linux")]
    ProxyModeUnsupportedPlatform,
    #[error("invalid value for `mode`: {0} (expected `dhcp` or `proxy`)")]
    InvalidMode(String),
    #[error("malformed lease file at line {line}: {reason}")]
    LeaseFile { line: usize, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("failed to bind {service} listener on {addr}: {source}")]
    Bind {
        service: &'static str,
        addr: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic cookie")]
    BadCookie,
    #[error("invalid BOOTP opcode: {0}")]
    InvalidOpcode(u8),
    #[error("truncated option at offset {0}")]
    TruncatedOption(usize),
    #[error("malformed option 93 (client architecture): {0}")]
    MalformedArch(&'static str),
    #[error("malformed option 97 (client UUID): {0}")]
    MalformedGuid(&'static str),
    #[error("unsupported client firmware type '{0}'")]
    UnsupportedFirmware(u16),
    #[error("not a PXE boot request (missing option 93)")]
    NotPxeBootRequest,
    #[error("packet is not a DISCOVER/REQUEST/RELEASE/DECLINE")]
    UnhandledMessageType,
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceExhaustion {
    #[error("no new IP addresses available in range {start}-{end}")]
    NoAddress { start: String, end: String },
}

/// Raised by `LeaseAllocator::confirm` when a REQUEST's claimed address
/// can't be honored (§4.A Confirm requires a matching existing entry or no
/// entry at all, and the §3 invariant that no two unexpired leases share an
/// IPv4). The DHCP/ProxyDHCP responder NAKs rather than ACKs on either kind.
#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    #[error("requested address {requested} does not match this client's existing lease {expected}")]
    Mismatch { expected: String, requested: String },
    #[error("requested address {0} is already leased to another client")]
    AddressInUse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("retransmission budget exceeded for block {block}")]
    RetryBudgetExceeded { block: u16 },
    #[error("peer TID mismatch: expected {expected}, got {got}")]
    UnknownTransferId { expected: String, got: String },
    #[error("I/O error during transfer: {0}")]
    Io(#[from] io::Error),
    #[error("client rejected option negotiation: {0}")]
    OptionNegotiationFailed(String),
    #[error("unsupported request opcode: {0}")]
    UnsupportedOpcode(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum BooterError {
    #[error("booter failed to produce a boot spec: {0}")]
    Spec(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("I/O error reading/writing boot artifact: {0}")]
    Io(#[from] io::Error),
}

/// Errors that can cross the orchestrator's error channel and terminate the
/// process. Only startup errors and unrecoverable listener failures
/// propagate this way; everything else is handled where it occurs.
#[derive(Debug, thiserror::Error)]
pub enum NetbootError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("listener for {service} failed: {source}")]
    Listener {
        service: &'static str,
        #[source]
        source: io::Error,
    },
}
