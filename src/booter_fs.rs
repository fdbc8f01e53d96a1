//! Filesystem-backed `Booter`: resolves artifact ids to files under
//! `doc_root/tftp_root`, and always offers the configured PXE/iPXE files.

use crate::boot::{BootSpec, Booter, Machine};
use crate::error::BooterError;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Minimal default `Booter`: every machine gets the same statically
/// configured kernel/initrd/cmdline, read from `tftp_root`. Real deployments
/// are expected to supply their own `Booter`; this one exists so the server
/// is useful out of the box and so `src/http.rs`/`src/dhcp_server.rs` have a
/// concrete capability to exercise in tests.
pub struct FsBooter {
    root: PathBuf,
    kernel: Option<String>,
    initrd: Vec<String>,
    cmdline: Option<String>,
}

impl FsBooter {
    pub fn new(
        root: PathBuf,
        kernel: Option<String>,
        initrd: Vec<String>,
        cmdline: Option<String>,
    ) -> Self {
        FsBooter {
            root,
            kernel,
            initrd,
            cmdline,
        }
    }

    fn resolve(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

impl Booter for FsBooter {
    fn boot_spec(&self, _machine: &Machine) -> Result<Option<BootSpec>, BooterError> {
        if self.kernel.is_none() {
            return Ok(None);
        }
        Ok(Some(BootSpec {
            kernel: self.kernel.clone(),
            initrd: self.initrd.clone(),
            cmdline: self.cmdline.clone(),
            message: None,
            ipxe_script: None,
        }))
    }

    fn read_boot_file(&self, id: &str) -> Result<(Box<dyn Read + Send>, i64), BooterError> {
        let path = self.resolve(id);
        let meta = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BooterError::NotFound(id.to_string())
            } else {
                BooterError::Io(e)
            }
        })?;
        let file = File::open(&path).map_err(BooterError::Io)?;
        Ok((Box::new(file), meta.len() as i64))
    }

    fn write_boot_file(&self, id: &str, stream: &mut dyn Read) -> Result<(), BooterError> {
        let path = self.resolve(id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(BooterError::Io)?;
        }
        let mut file = File::create(&path).map_err(BooterError::Io)?;
        std::io::copy(stream, &mut file).map_err(BooterError::Io)?;
        Ok(())
    }
}

/// Whether `path` exists under `root`, for the HTTP/TFTP handlers to answer
/// `ReadBootFile`-shaped requests against a plain static tree as well.
pub fn artifact_exists(root: &Path, id: &str) -> bool {
    root.join(id).is_file()
}
