//! Real-socket TFTP integration test: option negotiation (scenario 6 of the
//! boot server's spec) and a plain read transfer without options.

use netbootd::tftp::{FsTftpHandler, TftpConfig, TftpHandler, TftpServer};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const OP_RRQ: u16 = 1;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_OACK: u16 = 6;

fn start_server(root: std::path::PathBuf) -> (SocketAddr, Arc<AtomicBool>) {
    let handler: Arc<dyn TftpHandler> = Arc::new(FsTftpHandler::new(root));
    let shutdown = Arc::new(AtomicBool::new(false));
    let server = TftpServer::bind(
        "127.0.0.1".parse().unwrap(),
        0,
        handler,
        shutdown.clone(),
        TftpConfig::default(),
    )
    .unwrap();
    let addr = server.local_addr().unwrap();
    std::thread::spawn(move || {
        let _ = server.run();
    });
    (addr, shutdown)
}

fn build_rrq(filename: &str, opts: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = OP_RRQ.to_be_bytes().to_vec();
    buf.extend_from_slice(filename.as_bytes());
    buf.push(0);
    buf.extend_from_slice(b"octet");
    buf.push(0);
    for (k, v) in opts {
        buf.extend_from_slice(k.as_bytes());
        buf.push(0);
        buf.extend_from_slice(v.as_bytes());
        buf.push(0);
    }
    buf
}

fn parse_tlvs(buf: &[u8]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut fields = Vec::new();
    let mut start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b == 0 {
            fields.push(String::from_utf8_lossy(&buf[start..i]).into_owned());
            start = i + 1;
        }
    }
    let mut i = 0;
    while i + 1 < fields.len() {
        out.push((fields[i].clone(), fields[i + 1].clone()));
        i += 2;
    }
    out
}

/// Scenario 6: RRQ with `blksize 8`/`tsize 0` gets an OACK reflecting both,
/// then DATA blocks of exactly 8 bytes until a final short block.
#[test]
fn rrq_with_blksize_negotiates_oack_and_fixed_size_blocks() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pxelinux.0"), b"0123456789abcdef").unwrap(); // 16 bytes

    let (server_addr, shutdown) = start_server(dir.path().to_path_buf());
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let rrq = build_rrq("pxelinux.0", &[("blksize", "8"), ("tsize", "0")]);
    client.send_to(&rrq, server_addr).unwrap();

    let mut buf = [0u8; 600];
    let (n, transfer_addr) = client.recv_from(&mut buf).unwrap();
    let opcode = u16::from_be_bytes([buf[0], buf[1]]);
    assert_eq!(opcode, OP_OACK);
    let opts = parse_tlvs(&buf[2..n]);
    assert!(opts.iter().any(|(k, v)| k == "blksize" && v == "8"));
    assert!(opts.iter().any(|(k, v)| k == "tsize" && v == "16"));

    // ACK the OACK (block 0) to start the transfer.
    let mut ack = OP_ACK.to_be_bytes().to_vec();
    ack.extend_from_slice(&0u16.to_be_bytes());
    client.send_to(&ack, transfer_addr).unwrap();

    let mut received = Vec::new();
    let mut expected_block: u16 = 1;
    loop {
        let (n, _) = client.recv_from(&mut buf).unwrap();
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        assert_eq!(opcode, OP_DATA);
        let block = u16::from_be_bytes([buf[2], buf[3]]);
        assert_eq!(block, expected_block);
        let data = &buf[4..n];
        received.extend_from_slice(data);

        let mut ack = OP_ACK.to_be_bytes().to_vec();
        ack.extend_from_slice(&block.to_be_bytes());
        client.send_to(&ack, transfer_addr).unwrap();

        if data.len() < 8 {
            break;
        }
        expected_block = expected_block.wrapping_add(1);
    }

    assert_eq!(received, b"0123456789abcdef");
    shutdown.store(true, Ordering::Relaxed);
}

/// A plain RRQ with no options skips OACK entirely and uses the default
/// 512-byte block size.
#[test]
fn rrq_without_options_skips_oack() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("small.bin"), b"hello").unwrap();

    let (server_addr, shutdown) = start_server(dir.path().to_path_buf());
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let rrq = build_rrq("small.bin", &[]);
    client.send_to(&rrq, server_addr).unwrap();

    let mut buf = [0u8; 600];
    let (n, transfer_addr) = client.recv_from(&mut buf).unwrap();
    let opcode = u16::from_be_bytes([buf[0], buf[1]]);
    assert_eq!(opcode, OP_DATA);
    let block = u16::from_be_bytes([buf[2], buf[3]]);
    assert_eq!(block, 1);
    assert_eq!(&buf[4..n], b"hello");

    let mut ack = OP_ACK.to_be_bytes().to_vec();
    ack.extend_from_slice(&1u16.to_be_bytes());
    client.send_to(&ack, transfer_addr).unwrap();

    shutdown.store(true, Ordering::Relaxed);
}
