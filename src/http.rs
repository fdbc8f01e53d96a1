//! HTTP boot surface: serves iPXE scripts at `/_/ipxe` and artifact bytes at
//! `/_/file`, plus a plain static file tree under `http_root` for anything
//! else (kickstart files, templates already rendered to disk, etc. — the
//! actual templating is thin glue per spec, so this module only needs to
//! stream bytes).

use crate::boot::{Arch, BootSpec, Booter, Firmware, Machine};
use crate::net_types::MacAddr;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server};

pub struct HttpServer {
    server: Server,
    http_root: PathBuf,
    booter: Arc<dyn Booter>,
    server_ip: Ipv4Addr,
    http_port: u16,
    shutdown: Arc<AtomicBool>,
}

impl HttpServer {
    pub fn bind(
        listen_ip: Ipv4Addr,
        port: u16,
        http_root: PathBuf,
        booter: Arc<dyn Booter>,
        server_ip: Ipv4Addr,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, crate::error::BindError> {
        let addr = SocketAddr::new(listen_ip.into(), port);
        let server = Server::http(addr).map_err(|e| crate::error::BindError::Bind {
            service: "HTTP",
            addr: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;
        Ok(HttpServer {
            server,
            http_root,
            booter,
            server_ip,
            http_port: port,
            shutdown,
        })
    }

    /// Blocking accept loop; polled against `shutdown` the same way the UDP
    /// listeners are, so the orchestrator can coordinate shutdown across all
    /// four services uniformly.
    pub fn run(&self) -> std::io::Result<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            let request = match self.server.recv_timeout(Duration::from_millis(500)) {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) => return Err(e),
            };
            self.handle(request);
        }
        Ok(())
    }

    fn handle(&self, request: tiny_http::Request) {
        let method = request.method().clone();
        let url = request.url().to_string();
        let (path, query) = split_query(&url);

        log::info!("[HTTP] {method:?} {path}");

        if method != Method::Get {
            let _ = request.respond(Response::empty(405));
            return;
        }

        match path {
            "/_/ipxe" => self.serve_ipxe_script(request, query),
            "/_/file" => self.serve_file_artifact(request, query),
            _ => self.serve_static(request, path),
        }
    }

    fn serve_ipxe_script(&self, request: tiny_http::Request, query: &str) {
        let params = parse_query(query);
        let arch = params
            .get("arch")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(0);
        let mac: Option<MacAddr> = params.get("mac").and_then(|v| v.parse().ok());

        let Some(mac) = mac else {
            let _ = request.respond(Response::from_string("missing mac").with_status_code(400));
            return;
        };

        let machine = Machine {
            mac,
            arch: if arch == 0 { Arch::IA32 } else { Arch::X64 },
            firmware: Firmware::ChainloadedIpxe,
        };

        let spec = match self.booter.boot_spec(&machine) {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                let _ = request.respond(Response::empty(404));
                return;
            }
            Err(e) => {
                log::warn!("[HTTP] booter error for {mac}: {e}");
                let _ = request.respond(Response::empty(500));
                return;
            }
        };

        let script = render_ipxe_script(&spec, self.server_ip, self.http_port);
        let header = Header::from_bytes(&b"Content-Type"[..], &b"text/plain"[..]).unwrap();
        let _ = request.respond(Response::from_string(script).with_header(header));
    }

    fn serve_file_artifact(&self, request: tiny_http::Request, query: &str) {
        let params = parse_query(query);
        let Some(id) = params.get("id") else {
            let _ = request.respond(Response::from_string("missing id").with_status_code(400));
            return;
        };

        match self.booter.read_boot_file(id) {
            Ok((stream, len)) => {
                let response = if len >= 0 {
                    Response::new(200.into(), vec![], stream, Some(len as usize), None)
                } else {
                    Response::new(200.into(), vec![], stream, None, None)
                };
                let _ = request.respond(response);
            }
            Err(e) => {
                log::warn!("[HTTP] artifact {id} not served: {e}");
                let _ = request.respond(Response::empty(404));
            }
        }
    }

    fn serve_static(&self, request: tiny_http::Request, path: &str) {
        let Some(resolved) = resolve_static_path(&self.http_root, path) else {
            let _ = request.respond(Response::empty(400));
            return;
        };
        match std::fs::File::open(&resolved) {
            Ok(file) => {
                let len = file.metadata().ok().map(|m| m.len() as usize);
                let _ = request.respond(Response::new(200.into(), vec![], file, len, None));
            }
            Err(_) => {
                let _ = request.respond(Response::empty(404));
            }
        }
    }

}

fn split_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn parse_query(query: &str) -> std::collections::HashMap<&str, &str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

/// Rejects absolute paths and `..` segments so a request cannot escape
/// `root`.
fn resolve_static_path(root: &Path, url_path: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    let trimmed = url_path.trim_start_matches('/');
    let trimmed = if trimmed.is_empty() { "index.html" } else { trimmed };
    for part in trimmed.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return None;
        }
        resolved.push(part);
    }
    Some(resolved)
}

/// Renders the BootSpec into the iPXE script body the client fetches at
/// `/_/ipxe`. A literal `ipxe_script` overrides everything else; otherwise
/// a `kernel`/`initrd`/`boot` script is generated, with the `cmdline`
/// template's `ID("artifact")` calls resolved to `/_/file?id=...` URLs
/// served by this same surface (§4.G, grounded on the original's
/// template-function machinery for artifact URL resolution).
fn render_ipxe_script(spec: &BootSpec, server_ip: Ipv4Addr, http_port: u16) -> String {
    if let Some(script) = &spec.ipxe_script {
        return script.clone();
    }

    let base = format!("http://{server_ip}:{http_port}");
    let mut out = String::from("#!ipxe\n");

    if let Some(message) = &spec.message {
        out.push_str(&format!("echo {message}\n"));
    }

    if let Some(kernel) = &spec.kernel {
        let cmdline = spec
            .cmdline
            .as_deref()
            .map(|c| render_cmdline(c, &base))
            .unwrap_or_default();
        if cmdline.is_empty() {
            out.push_str(&format!("kernel {base}/_/file?id={kernel}\n"));
        } else {
            out.push_str(&format!("kernel {base}/_/file?id={kernel} {cmdline}\n"));
        }
    }

    for initrd in &spec.initrd {
        out.push_str(&format!("initrd {base}/_/file?id={initrd}\n"));
    }

    out.push_str("boot\n");
    out
}

/// Resolves `ID("artifact-id")` calls embedded in a cmdline template to
/// `/_/file?id=artifact-id` URLs against `base`. Anything outside an
/// `ID(...)` call is passed through unchanged.
fn render_cmdline(template: &str, base: &str) -> String {
    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("ID(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        let Some(close) = after.find(')') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let arg = after[..close].trim().trim_matches(|c| c == '"' || c == '\'');
        out.push_str(&format!("{base}/_/file?id={arg}"));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}
