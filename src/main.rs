//! `netbootd -c /etc/netbootd.yaml`
//!
//! Loads config, starts the logger, and binds+serves every listener on the
//! current thread until one of them fails or the process is signalled.

use anyhow::Context;
use clap::Parser;
use netbootd::booter_fs::FsBooter;
use netbootd::config::Config;
use netbootd::orchestrator::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "netbootd", version, about = "PXE network boot server")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

fn main() {
    let args = Args::parse();
    netbootd::logging::init();

    if let Err(e) = run(args) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    // FsBooter ships no kernel/initrd/cmdline out of the box: `pxe_file`/
    // `ipxe_file` name the boot loader handed off via DHCP options and TFTP,
    // not an HTTP-chainloaded kernel. A deployment that wants the iPXE
    // `/_/ipxe` script endpoint to produce anything supplies its own
    // `Booter`; this default only serves artifacts already present under
    // `tftp_root` by id.
    let booter: Arc<dyn netbootd::boot::Booter> =
        Arc::new(FsBooter::new(config.tftp_root.clone(), None, Vec::new(), None));

    let orchestrator = Orchestrator::bind(config, booter).context("binding listeners")?;
    orchestrator.serve().context("serving")?;
    Ok(())
}
