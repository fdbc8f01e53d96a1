//! YAML configuration loading and validation.
//!
//! Config loading and duration/IP validation are small but real external
//! collaborators the orchestrator depends on, so they get a complete
//! implementation rather than a stub.

use crate::error::ConfigError;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Full DHCP server (binds :67, exclusive).
    Dhcp,
    /// ProxyDHCP / snooper mode (Linux only).
    Proxy,
}

impl Default for ServerMode {
    fn default() -> Self {
        ServerMode::Dhcp
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    service_ip: String,
    #[serde(default = "defaults::listen_ip")]
    listen_ip: String,
    #[serde(default = "defaults::doc_root")]
    doc_root: String,
    #[serde(default = "defaults::http_port")]
    http_port: u16,
    #[serde(default = "defaults::tftp_port")]
    tftp_port: u16,
    #[serde(default = "defaults::dhcp_port")]
    dhcp_port: u16,
    #[serde(default = "defaults::http_root")]
    http_root: String,
    #[serde(default = "defaults::tftp_root")]
    tftp_root: String,
    start_ip: String,
    end_ip: String,
    #[serde(default = "defaults::netmask")]
    netmask: String,
    #[serde(default = "defaults::router")]
    router: String,
    #[serde(default = "defaults::dns_server")]
    dns_server: String,
    #[serde(default = "defaults::pxe_file")]
    pxe_file: String,
    #[serde(default = "defaults::ipxe_file")]
    ipxe_file: String,
    #[serde(default = "defaults::enable_ipxe")]
    enable_ipxe: bool,
    #[serde(default = "defaults::lease_duration")]
    lease_duration: String,
    #[serde(default)]
    lease_file: Option<String>,
    #[serde(default)]
    mode: ServerMode,
}

mod defaults {
    pub fn listen_ip() -> String {
        "0.0.0.0".into()
    }
    pub fn doc_root() -> String {
        "/var/lib/netbootd".into()
    }
    pub fn http_port() -> u16 {
        80
    }
    pub fn tftp_port() -> u16 {
        69
    }
    pub fn dhcp_port() -> u16 {
        67
    }
    pub fn http_root() -> String {
        "http".into()
    }
    pub fn tftp_root() -> String {
        "netboot".into()
    }
    pub fn netmask() -> String {
        "255.255.255.0".into()
    }
    pub fn router() -> String {
        "0.0.0.0".into()
    }
    pub fn dns_server() -> String {
        "8.8.8.8".into()
    }
    pub fn pxe_file() -> String {
        "pxelinux.0".into()
    }
    pub fn ipxe_file() -> String {
        "boot.ipxe".into()
    }
    pub fn enable_ipxe() -> bool {
        true
    }
    pub fn lease_duration() -> String {
        "24h".into()
    }
}

/// Validated, ready-to-use configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_ip: Ipv4Addr,
    pub listen_ip: Ipv4Addr,
    pub doc_root: PathBuf,
    pub http_port: u16,
    pub tftp_port: u16,
    pub dhcp_port: u16,
    pub http_root: PathBuf,
    pub tftp_root: PathBuf,
    pub start_ip: Ipv4Addr,
    pub end_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub router: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub pxe_file: String,
    pub ipxe_file: String,
    pub enable_ipxe: bool,
    pub lease_duration: Duration,
    pub lease_file: Option<PathBuf>,
    pub mode: ServerMode,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Config, ConfigError> {
        let parse_ip = |field: &'static str, value: &str| -> Result<Ipv4Addr, ConfigError> {
            value.parse().map_err(|_| ConfigError::InvalidIpv4 {
                field,
                value: value.to_string(),
            })
        };

        let service_ip = parse_ip("service_ip", &raw.service_ip)?;
        let listen_ip = parse_ip("listen_ip", &raw.listen_ip)?;
        let start_ip = parse_ip("start_ip", &raw.start_ip)?;
        let end_ip = parse_ip("end_ip", &raw.end_ip)?;
        let netmask = parse_ip("netmask", &raw.netmask)?;
        let router = parse_ip("router", &raw.router)?;
        let dns_server = parse_ip("dns_server", &raw.dns_server)?;

        if u32::from(start_ip) > u32::from(end_ip) {
            return Err(ConfigError::InvalidRange {
                start: raw.start_ip,
                end: raw.end_ip,
            });
        }

        let lease_duration = duration_str::parse(&raw.lease_duration).map_err(|_| {
            ConfigError::InvalidDuration {
                field: "lease_duration",
                value: raw.lease_duration.clone(),
            }
        })?;

        if raw.mode == ServerMode::Proxy && !cfg!(target_os = "linux") {
            return Err(ConfigError::ProxyModeUnsupportedPlatform);
        }

        let doc_root = PathBuf::from(raw.doc_root);
        Ok(Config {
            service_ip,
            listen_ip,
            http_root: doc_root.join(&raw.http_root),
            tftp_root: doc_root.join(&raw.tftp_root),
            doc_root,
            http_port: raw.http_port,
            tftp_port: raw.tftp_port,
            dhcp_port: raw.dhcp_port,
            start_ip,
            end_ip,
            netmask,
            router,
            dns_server,
            pxe_file: raw.pxe_file,
            ipxe_file: raw.ipxe_file,
            enable_ipxe: raw.enable_ipxe,
            lease_duration,
            lease_file: raw.lease_file.map(PathBuf::from),
            mode: raw.mode,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal_yaml() -> &'static str {
        "service_ip: 192.168.1.1\nstart_ip: 192.168.1.100\nend_ip: 192.168.1.200\n"
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let raw: RawConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        let cfg = Config::from_raw(raw).unwrap();
        assert_eq!(cfg.service_ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(cfg.http_port, 80);
        assert_eq!(cfg.tftp_port, 69);
        assert_eq!(cfg.dhcp_port, 67);
        assert_eq!(cfg.lease_duration, Duration::from_secs(24 * 3600));
        assert_eq!(cfg.mode, ServerMode::Dhcp);
    }

    #[test]
    fn rejects_inverted_range() {
        let yaml = "service_ip: 192.168.1.1\nstart_ip: 192.168.1.200\nend_ip: 192.168.1.100\n";
        let raw: RawConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            Config::from_raw(raw),
            Err(ConfigError::InvalidRange { .. })
        ));
    }

    #[test]
    fn rejects_bad_ip() {
        let yaml = "service_ip: not-an-ip\nstart_ip: 192.168.1.100\nend_ip: 192.168.1.200\n";
        let raw: RawConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            Config::from_raw(raw),
            Err(ConfigError::InvalidIpv4 { .. })
        ));
    }
}
