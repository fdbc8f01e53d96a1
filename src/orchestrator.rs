//! Binds the four listeners and coordinates their lifecycle: one worker
//! thread per service, a shared error channel, first-error shutdown.
//!
//! Grounded on `original_source/core/service.go`'s `Start`/`Shutdown` pair:
//! that implementation spawns one goroutine per listener, shares a single
//! buffered error channel among them, and lets the first value pulled from
//! it (error or the explicit `nil` from `Shutdown`) drive a coordinated
//! close of every listener. The thread/channel shape below is the direct
//! translation of that pattern to `std::thread`/`std::sync::mpsc`.

use crate::boot::Booter;
use crate::config::Config;
use crate::dhcp_server::DhcpServer;
use crate::error::{BindError, NetbootError};
use crate::http::HttpServer;
use crate::lease::LeaseAllocator;
use crate::logging::BootEventLog;
use crate::pxe4011::Pxe4011Responder;
use crate::tftp::{FsTftpHandler, TftpConfig, TftpHandler, TftpServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::time::Duration;

/// A handle that can request an orderly shutdown of a running
/// [`Orchestrator::serve`] call from another thread (e.g. a signal
/// handler), mirroring the original's `Shutdown()` entry point.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: SyncSender<Option<NetbootError>>,
}

impl ShutdownHandle {
    /// Posts a `None` into the error channel non-blockingly. Idempotent:
    /// a full channel (already shutting down) is not an error.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(None);
    }
}

pub struct Orchestrator {
    config: Arc<Config>,
    leases: Arc<LeaseAllocator>,
    booter: Arc<dyn Booter>,
    events: Arc<BootEventLog>,
    shutdown: Arc<AtomicBool>,
    dhcp: DhcpServer,
    tftp: TftpServer,
    pxe: Pxe4011Responder,
    http: HttpServer,
    tx: SyncSender<Option<NetbootError>>,
    rx: std::sync::mpsc::Receiver<Option<NetbootError>>,
}

impl Orchestrator {
    /// Opens all four listeners up front. If any bind fails, every listener
    /// already opened in this call is dropped (closing its socket) before
    /// the error is returned, so a partial start leaks no file descriptors.
    pub fn bind(config: Config, booter: Arc<dyn Booter>) -> Result<Self, BindError> {
        let config = Arc::new(config);
        let leases = Arc::new(
            LeaseAllocator::new(
                config.start_ip,
                config.end_ip,
                config.lease_duration,
                config.lease_file.clone(),
            )
            .map_err(|e| BindError::Bind {
                service: "lease table",
                addr: "n/a".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?,
        );
        let events = Arc::new(BootEventLog::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let dhcp = DhcpServer::bind(
            config.clone(),
            leases.clone(),
            booter.clone(),
            events.clone(),
            shutdown.clone(),
        )?;

        let tftp_handler: Arc<dyn TftpHandler> =
            Arc::new(FsTftpHandler::new(config.tftp_root.clone()));
        let tftp = match TftpServer::bind(
            config.listen_ip,
            config.tftp_port,
            tftp_handler,
            shutdown.clone(),
            TftpConfig::default(),
        ) {
            Ok(s) => s,
            Err(e) => {
                drop(dhcp);
                return Err(e);
            }
        };

        let pxe = match Pxe4011Responder::bind(config.clone(), shutdown.clone()) {
            Ok(s) => s,
            Err(e) => {
                drop(dhcp);
                drop(tftp);
                return Err(e);
            }
        };

        let http = match HttpServer::bind(
            config.listen_ip,
            config.http_port,
            config.http_root.clone(),
            booter.clone(),
            config.service_ip,
            shutdown.clone(),
        ) {
            Ok(s) => s,
            Err(e) => {
                drop(dhcp);
                drop(tftp);
                drop(pxe);
                return Err(e);
            }
        };

        // Capacity >= number-of-workers + 1 (4 workers + Shutdown()), per
        // §4.H.
        let (tx, rx) = sync_channel(5);

        Ok(Orchestrator {
            config,
            leases,
            booter,
            events,
            shutdown,
            dhcp,
            tftp,
            pxe,
            http,
            tx,
            rx,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn lease_table(&self) -> Arc<LeaseAllocator> {
        self.leases.clone()
    }

    pub fn boot_events(&self) -> Arc<BootEventLog> {
        self.events.clone()
    }

    /// Runs until the first error (or an explicit `Shutdown()`), then tears
    /// down every listener and returns. Blocking; spawn this on its own
    /// thread if the caller needs to keep doing other work.
    pub fn serve(self) -> Result<(), NetbootError> {
        log::info!(
            "[ORCH] netbootd serving: dhcp={}:{} tftp={}:{} http={}:{} pxe4011={}:4011 mode={:?}",
            self.config.listen_ip,
            self.config.dhcp_port,
            self.config.listen_ip,
            self.config.tftp_port,
            self.config.listen_ip,
            self.config.http_port,
            self.config.listen_ip,
            self.config.mode,
        );

        std::thread::scope(|scope| {
            let tx_dhcp = self.tx.clone();
            scope.spawn(|| {
                let result = self.dhcp.run().map_err(|source| NetbootError::Listener {
                    service: "DHCP",
                    source,
                });
                let _ = tx_dhcp.try_send(result.err());
            });

            let tx_tftp = self.tx.clone();
            scope.spawn(|| {
                let result = self.tftp.run().map_err(|source| NetbootError::Listener {
                    service: "TFTP",
                    source,
                });
                let _ = tx_tftp.try_send(result.err());
            });

            let tx_http = self.tx.clone();
            scope.spawn(|| {
                let result = self.http.run().map_err(|source| NetbootError::Listener {
                    service: "HTTP",
                    source,
                });
                let _ = tx_http.try_send(result.err());
            });

            let tx_pxe = self.tx.clone();
            scope.spawn(|| {
                let result = self.pxe.run().map_err(|source| NetbootError::Listener {
                    service: "PXE-4011",
                    source,
                });
                let _ = tx_pxe.try_send(result.err());
            });

            // Opportunistic lease pruning; not part of the core protocol
            // logic, just housekeeping so a long-lived process doesn't
            // accumulate tentative leases that were never confirmed.
            let tx_prune = self.tx.clone();
            scope.spawn(|| {
                while !self.shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_secs(30));
                    self.leases.prune();
                }
                let _ = tx_prune.try_send(None);
            });

            let first = self.rx.recv().unwrap_or(None);
            self.shutdown.store(true, Ordering::Relaxed);
            first
        })
        .map_or(Ok(()), Err)
    }
}
