//! TFTP (RFC 1350) read/write engine with RFC 2347/2348/2349 option
//! negotiation.
//!
//! One socket accepts RRQ/WRQ on the well-known port; every accepted
//! request then gets its own ephemeral UDP socket and its own worker
//! thread, matching the per-client-TID shape the protocol requires (§4.C).
//! The listener thread never blocks on a transfer; a slow or stalled
//! client only ties up its own thread and socket.

pub mod options;

use crate::error::{BindError, TransferError};
use options::{negotiate, parse_options, NegotiatedOptions, RequestedOptions};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const OP_RRQ: u16 = 1;
const OP_WRQ: u16 = 2;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;
const OP_OACK: u16 = 6;

const ERR_UNKNOWN_TID: u16 = 5;
const ERR_NOT_FOUND: u16 = 1;
const ERR_ACCESS_VIOLATION: u16 = 2;
const ERR_ILLEGAL_OPERATION: u16 = 4;

/// Given a path and the requesting client address, yields a byte stream and
/// its total length, or `None` when the length is not known up front (which
/// disables `tsize` and meaningfully slows clients, per §4.C).
pub trait TftpHandler: Send + Sync {
    fn open_read(
        &self,
        path: &str,
        client: SocketAddr,
    ) -> Result<(Box<dyn Read + Send>, Option<u64>), TransferError>;

    fn open_write(
        &self,
        path: &str,
        client: SocketAddr,
    ) -> Result<Box<dyn Write + Send>, TransferError>;
}

/// Serves a filesystem tree rooted at `root`; `..` path segments are
/// rejected so a request cannot escape the tree, matching the original
/// lineage's `filepath.Join` containment trick.
pub struct FsTftpHandler {
    root: PathBuf,
}

impl FsTftpHandler {
    pub fn new(root: PathBuf) -> Self {
        FsTftpHandler { root }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, TransferError> {
        let mut resolved = self.root.clone();
        for part in path.split('/') {
            if part.is_empty() || part == "." {
                continue;
            }
            if part == ".." {
                return Err(TransferError::OptionNegotiationFailed(
                    "path traversal rejected".into(),
                ));
            }
            resolved.push(part);
        }
        Ok(resolved)
    }
}

impl TftpHandler for FsTftpHandler {
    fn open_read(
        &self,
        path: &str,
        _client: SocketAddr,
    ) -> Result<(Box<dyn Read + Send>, Option<u64>), TransferError> {
        let resolved = self.resolve(path)?;
        let file = std::fs::File::open(&resolved)?;
        let len = file.metadata()?.len();
        Ok((Box::new(file), Some(len)))
    }

    fn open_write(
        &self,
        path: &str,
        _client: SocketAddr,
    ) -> Result<Box<dyn Write + Send>, TransferError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&resolved)?;
        Ok(Box::new(file))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TftpConfig {
    pub max_block_size: u16,
    pub write_timeout: Duration,
    pub max_retries: u32,
}

impl Default for TftpConfig {
    fn default() -> Self {
        TftpConfig {
            // Clamped to fit a standard 1500-byte MTU after UDP+IP headers.
            max_block_size: 1468,
            write_timeout: Duration::from_secs(1),
            max_retries: 5,
        }
    }
}

pub struct TftpServer {
    socket: UdpSocket,
    listen_ip: Ipv4Addr,
    handler: Arc<dyn TftpHandler>,
    shutdown: Arc<AtomicBool>,
    cfg: TftpConfig,
}

impl TftpServer {
    pub fn bind(
        listen_ip: Ipv4Addr,
        port: u16,
        handler: Arc<dyn TftpHandler>,
        shutdown: Arc<AtomicBool>,
        cfg: TftpConfig,
    ) -> Result<Self, BindError> {
        let addr = SocketAddr::new(listen_ip.into(), port);
        let socket = UdpSocket::bind(addr).map_err(|source| BindError::Bind {
            service: "TFTP",
            addr: addr.to_string(),
            source,
        })?;
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .ok();
        Ok(TftpServer {
            socket,
            listen_ip,
            handler,
            shutdown,
            cfg,
        })
    }

    /// The address this listener bound to; useful when `port` was `0` and
    /// the OS assigned an ephemeral port (tests, or co-located instances).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Blocking accept loop; each accepted RRQ/WRQ spawns its own worker
    /// thread and ephemeral socket, so a single stuck transfer never stalls
    /// new requests.
    pub fn run(&self) -> std::io::Result<()> {
        let mut buf = [0u8; 4096];
        while !self.shutdown.load(Ordering::Relaxed) {
            let (n, src) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            };
            self.accept(&buf[0..n], src);
        }
        Ok(())
    }

    fn accept(&self, buf: &[u8], src: SocketAddr) {
        let request = match parse_request(buf) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("[TFTP] malformed request from {src}: {e}");
                return;
            }
        };

        let transfer_socket = match UdpSocket::bind(SocketAddr::new(self.listen_ip.into(), 0)) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[TFTP] could not open transfer socket for {src}: {e}");
                return;
            }
        };

        let handler = self.handler.clone();
        let cfg = self.cfg;
        std::thread::spawn(move || {
            let mut transfer = Transfer {
                socket: transfer_socket,
                client: src,
                handler,
                cfg,
            };
            match request.opcode {
                OP_RRQ => transfer.run_read(&request.filename, &request.options),
                OP_WRQ => transfer.run_write(&request.filename, &request.options),
                _ => unreachable!("parse_request only yields RRQ/WRQ"),
            }
        });
    }
}

struct ParsedRequest {
    opcode: u16,
    filename: String,
    options: RequestedOptions,
}

fn parse_request(buf: &[u8]) -> Result<ParsedRequest, TransferError> {
    if buf.len() < 4 {
        return Err(TransferError::UnsupportedOpcode(0));
    }
    let opcode = u16::from_be_bytes([buf[0], buf[1]]);
    if opcode != OP_RRQ && opcode != OP_WRQ {
        return Err(TransferError::UnsupportedOpcode(opcode));
    }
    let fields = split_nul_fields(&buf[2..])?;
    if fields.len() < 2 {
        return Err(TransferError::OptionNegotiationFailed(
            "missing filename or mode".into(),
        ));
    }
    // Mode (netascii/octet/mail) is accepted but treated as octet uniformly
    // (§4.C known simplification); only the filename and trailing options
    // matter from here on.
    let options = parse_options(&fields[2..]);
    Ok(ParsedRequest {
        opcode,
        filename: fields[0].to_string(),
        options,
    })
}

fn split_nul_fields(buf: &[u8]) -> Result<Vec<&str>, TransferError> {
    let mut fields = Vec::new();
    let mut start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b == 0 {
            let field = std::str::from_utf8(&buf[start..i]).map_err(|_| {
                TransferError::OptionNegotiationFailed("non-UTF8 request field".into())
            })?;
            fields.push(field);
            start = i + 1;
        }
    }
    Ok(fields)
}

fn build_data(block: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&OP_DATA.to_be_bytes());
    out.extend_from_slice(&block.to_be_bytes());
    out.extend_from_slice(data);
    out
}

fn build_ack(block: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&OP_ACK.to_be_bytes());
    out.extend_from_slice(&block.to_be_bytes());
    out
}

fn build_error(code: u16, msg: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + msg.len());
    out.extend_from_slice(&OP_ERROR.to_be_bytes());
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(msg.as_bytes());
    out.push(0);
    out
}

fn build_oack(requested: &RequestedOptions, negotiated: &NegotiatedOptions) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&OP_OACK.to_be_bytes());
    if requested.blksize.is_some() {
        push_option(&mut out, "blksize", &negotiated.block_size.to_string());
    }
    if requested.tsize.is_some() {
        if let Some(size) = negotiated.tsize {
            push_option(&mut out, "tsize", &size.to_string());
        }
    }
    if requested.timeout.is_some() {
        push_option(&mut out, "timeout", &negotiated.timeout.as_secs().to_string());
    }
    out
}

fn push_option(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.extend_from_slice(value.as_bytes());
    out.push(0);
}

/// One in-flight transfer: its own ephemeral socket, keyed to one client
/// address/port pair (the TID). A datagram from any other source during
/// the transfer gets an "unknown transfer ID" error but does not abort
/// this transfer, per §4.C.
struct Transfer {
    socket: UdpSocket,
    client: SocketAddr,
    handler: Arc<dyn TftpHandler>,
    cfg: TftpConfig,
}

impl Transfer {
    fn run_read(&mut self, path: &str, requested: &RequestedOptions) {
        let (mut reader, size) = match self.handler.open_read(path, self.client) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[TFTP] RRQ {path} from {}: {e}", self.client);
                self.send_raw(&build_error(ERR_NOT_FOUND, &e.to_string()));
                return;
            }
        };

        let negotiated = negotiate(requested, self.cfg.max_block_size, self.cfg.write_timeout, size);
        self.socket.set_read_timeout(Some(negotiated.timeout)).ok();

        let mut block: u16 = 0;
        if negotiated.negotiated {
            let oack = build_oack(requested, &negotiated);
            if !self.send_and_await_ack(&oack, 0) {
                return;
            }
        }

        let mut buf = vec![0u8; negotiated.block_size as usize];
        loop {
            block = block.wrapping_add(1);
            let n = match read_fill(&mut reader, &mut buf) {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("[TFTP] read error serving {path} to {}: {e}", self.client);
                    self.send_raw(&build_error(ERR_ACCESS_VIOLATION, "read error"));
                    return;
                }
            };
            let datagram = build_data(block, &buf[0..n]);
            if !self.send_and_await_ack(&datagram, block) {
                return;
            }
            if n < negotiated.block_size as usize {
                break;
            }
        }
        log::info!("[TFTP] sent {path} to {}", self.client);
    }

    fn run_write(&mut self, path: &str, requested: &RequestedOptions) {
        let mut writer = match self.handler.open_write(path, self.client) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[TFTP] WRQ {path} from {}: {e}", self.client);
                self.send_raw(&build_error(ERR_ACCESS_VIOLATION, &e.to_string()));
                return;
            }
        };

        let negotiated = negotiate(
            requested,
            self.cfg.max_block_size,
            self.cfg.write_timeout,
            requested.tsize,
        );
        self.socket.set_read_timeout(Some(negotiated.timeout)).ok();

        let mut block: u16 = 0;
        let first_ack = if negotiated.negotiated {
            build_oack(requested, &negotiated)
        } else {
            build_ack(0)
        };
        self.send_raw(&first_ack);

        loop {
            let Some((opcode, recv_block, data)) = self.await_data() else {
                return;
            };
            if opcode != OP_DATA {
                log::warn!("[TFTP] expected DATA from {}, got opcode {opcode}", self.client);
                return;
            }
            block = block.wrapping_add(1);
            if recv_block != block {
                // Duplicate/out-of-order block: re-ack the last good block
                // and keep waiting rather than aborting the transfer.
                self.send_raw(&build_ack(block.wrapping_sub(1)));
                block = block.wrapping_sub(1);
                continue;
            }
            if let Err(e) = writer.write_all(&data) {
                log::warn!("[TFTP] write error receiving {path} from {}: {e}", self.client);
                self.send_raw(&build_error(ERR_ACCESS_VIOLATION, "write error"));
                return;
            }
            self.send_raw(&build_ack(block));
            if data.len() < negotiated.block_size as usize {
                break;
            }
        }
        log::info!("[TFTP] received {path} from {}", self.client);
    }

    /// Sends `datagram` and waits for the matching ACK, retransmitting on
    /// timeout up to `max_retries`. Returns `false` if the retry budget was
    /// exhausted (the transfer has already been aborted and logged).
    fn send_and_await_ack(&mut self, datagram: &[u8], expected_block: u16) -> bool {
        let mut attempts = 0;
        loop {
            self.send_raw(datagram);
            match self.await_ack(expected_block) {
                AwaitResult::Ok => return true,
                AwaitResult::Timeout => {
                    attempts += 1;
                    if attempts > self.cfg.max_retries {
                        log::warn!(
                            "[TFTP] retransmission budget exceeded for block {expected_block} to {}",
                            self.client
                        );
                        return false;
                    }
                }
                AwaitResult::Fatal => return false,
            }
        }
    }

    fn await_ack(&mut self, expected_block: u16) -> AwaitResult {
        let mut buf = [0u8; 516];
        loop {
            let (n, src) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return AwaitResult::Timeout
                }
                Err(_) => return AwaitResult::Fatal,
            };
            if src != self.client {
                let _ = self
                    .socket
                    .send_to(&build_error(ERR_UNKNOWN_TID, "unknown transfer ID"), src);
                continue;
            }
            if n < 4 {
                continue;
            }
            let opcode = u16::from_be_bytes([buf[0], buf[1]]);
            let block = u16::from_be_bytes([buf[2], buf[3]]);
            if opcode == OP_ACK && block == expected_block {
                return AwaitResult::Ok;
            }
            if opcode == OP_ERROR {
                return AwaitResult::Fatal;
            }
        }
    }

    fn await_data(&mut self) -> Option<(u16, u16, Vec<u8>)> {
        let mut buf = vec![0u8; 65536];
        loop {
            let (n, src) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(_) => return None,
            };
            if src != self.client {
                let _ = self
                    .socket
                    .send_to(&build_error(ERR_UNKNOWN_TID, "unknown transfer ID"), src);
                continue;
            }
            if n < 4 {
                continue;
            }
            let opcode = u16::from_be_bytes([buf[0], buf[1]]);
            let block = u16::from_be_bytes([buf[2], buf[3]]);
            return Some((opcode, block, buf[4..n].to_vec()));
        }
    }

    fn send_raw(&self, datagram: &[u8]) {
        if let Err(e) = self.socket.send_to(datagram, self.client) {
            log::debug!("[TFTP] send to {} failed: {e}", self.client);
        }
    }
}

enum AwaitResult {
    Ok,
    Timeout,
    Fatal,
}

fn read_fill(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Errors caused by malformed opcodes surface here so callers can treat
/// them uniformly; used only for the listener's own logging.
pub fn opcode_name(opcode: u16) -> &'static str {
    match opcode {
        OP_RRQ => "RRQ",
        OP_WRQ => "WRQ",
        OP_DATA => "DATA",
        OP_ACK => "ACK",
        OP_ERROR => "ERROR",
        OP_OACK => "OACK",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rrq(filename: &str, mode: &str, opts: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = OP_RRQ.to_be_bytes().to_vec();
        buf.extend_from_slice(filename.as_bytes());
        buf.push(0);
        buf.extend_from_slice(mode.as_bytes());
        buf.push(0);
        for (k, v) in opts {
            buf.extend_from_slice(k.as_bytes());
            buf.push(0);
            buf.extend_from_slice(v.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn parses_plain_rrq() {
        let buf = rrq("pxelinux.0", "octet", &[]);
        let req = parse_request(&buf).unwrap();
        assert_eq!(req.opcode, OP_RRQ);
        assert_eq!(req.filename, "pxelinux.0");
        assert!(req.options.is_empty());
    }

    #[test]
    fn parses_rrq_with_blksize_and_tsize() {
        let buf = rrq("pxelinux.0", "octet", &[("blksize", "8"), ("tsize", "0")]);
        let req = parse_request(&buf).unwrap();
        assert_eq!(req.options.blksize, Some(8));
        assert_eq!(req.options.tsize, Some(0));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut buf = 9u16.to_be_bytes().to_vec();
        buf.extend_from_slice(b"x\0x\0");
        assert!(parse_request(&buf).is_err());
    }

    #[test]
    fn data_packet_wire_shape() {
        let packet = build_data(3, &[1, 2, 3]);
        assert_eq!(&packet[0..2], &OP_DATA.to_be_bytes());
        assert_eq!(&packet[2..4], &3u16.to_be_bytes());
        assert_eq!(&packet[4..], &[1, 2, 3]);
    }

    #[test]
    fn oack_only_lists_requested_options() {
        let requested = RequestedOptions {
            blksize: Some(8),
            ..Default::default()
        };
        let negotiated = negotiate(&requested, 1468, Duration::from_secs(1), Some(10));
        let packet = build_oack(&requested, &negotiated);
        let text = String::from_utf8_lossy(&packet[2..]);
        assert!(text.contains("blksize"));
        assert!(!text.contains("tsize"));
    }

    #[test]
    fn fs_handler_rejects_path_traversal() {
        let handler = FsTftpHandler::new(PathBuf::from("/tmp/netboot-root"));
        let client: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert!(handler.open_read("../../etc/passwd", client).is_err());
    }
}
