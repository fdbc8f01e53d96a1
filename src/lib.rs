//! netbootd: a self-contained PXE network boot server.
//!
//! Binds a DHCP/ProxyDHCP responder, a TFTP server, an HTTP boot surface,
//! and a PXE port-4011 follow-up responder, and drives them from a single
//! [`orchestrator::Orchestrator`]. The wire codecs and protocol logic live
//! in their own modules so they can be tested in isolation from sockets.

pub mod boot;
pub mod booter_fs;
pub mod config;
pub mod dhcp;
pub mod dhcp_server;
pub mod error;
pub mod http;
pub mod lease;
pub mod logging;
pub mod net_types;
pub mod orchestrator;
pub mod pxe4011;
pub mod tftp;

pub use error::NetbootError;
pub use orchestrator::{Orchestrator, ShutdownHandle};
