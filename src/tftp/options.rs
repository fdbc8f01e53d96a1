//! RFC 2347/2348/2349 option parsing and negotiation: `blksize`, `tsize`,
//! `timeout`. Negotiated values always respect the server's configured
//! ceiling; the server may unilaterally clamp a client's proposal downward,
//! never upward.

use std::time::Duration;

/// Options as requested by a client's RRQ/WRQ, before negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedOptions {
    pub blksize: Option<u16>,
    pub tsize: Option<u64>,
    pub timeout: Option<u8>,
}

impl RequestedOptions {
    pub fn is_empty(&self) -> bool {
        self.blksize.is_none() && self.tsize.is_none() && self.timeout.is_none()
    }
}

/// Parses the NUL-terminated `name\0value\0` pairs following the mode string
/// in an RRQ/WRQ. Unknown option names are ignored per RFC 2347 (a server
/// simply omits them from its OACK).
pub fn parse_options(fields: &[&str]) -> RequestedOptions {
    let mut opts = RequestedOptions::default();
    let mut i = 0;
    while i + 1 < fields.len() {
        let name = fields[i].to_ascii_lowercase();
        let value = fields[i + 1];
        match name.as_str() {
            "blksize" => opts.blksize = value.parse().ok(),
            "tsize" => opts.tsize = value.parse().ok(),
            "timeout" => opts.timeout = value.parse().ok(),
            _ => {}
        }
        i += 2;
    }
    opts
}

/// Negotiated transfer parameters, the result of clamping a client's
/// requested options against server limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedOptions {
    pub block_size: u16,
    /// `Some(size)` when a `tsize` option was requested and a size is known;
    /// the value itself (actual file size on RRQ, client-declared size on
    /// WRQ) is what goes back in the OACK.
    pub tsize: Option<u64>,
    pub timeout: Duration,
    /// Whether any option was requested at all; if not, the transfer
    /// proceeds straight to DATA/ACK with no OACK.
    pub negotiated: bool,
}

pub const DEFAULT_BLOCK_SIZE: u16 = 512;
pub const MIN_BLOCK_SIZE: u16 = 8;

/// Clamp the client's requested options against server configuration.
/// `max_block_size` is the server ceiling (default 1468, RFC 2348 caps
/// `blksize` at 65464 regardless). `file_size` is `None` when the handler
/// cannot report a length (disables `tsize` in the reply, per §4.C).
pub fn negotiate(
    requested: &RequestedOptions,
    max_block_size: u16,
    default_timeout: Duration,
    file_size: Option<u64>,
) -> NegotiatedOptions {
    let block_size = requested
        .blksize
        .map(|b| b.clamp(MIN_BLOCK_SIZE, max_block_size.min(65464)))
        .unwrap_or(DEFAULT_BLOCK_SIZE);

    let tsize = requested.tsize.and_then(|_| file_size);

    let timeout = requested
        .timeout
        .map(|t| Duration::from_secs(t.max(1) as u64))
        .unwrap_or(default_timeout);

    NegotiatedOptions {
        block_size,
        tsize,
        timeout,
        negotiated: !requested.is_empty(),
    }
}
