//! usb-automountd - mounts removable partitions as they are plugged in.
//!
//! Runs as a privileged background service. There is no runtime
//! configuration: mount points live under `/media/<user>/<label>` and output
//! goes to `/var/log/mount_daemon.log`.

mod daemon;
mod logging;

use std::path::Path;

use clap::Parser;
use tracing::{info, warn};
use usb_automount_core::resolve::DEFAULT_MOUNT_ROOT;
use usb_automount_core::{Automounter, EventLoop, MountTable, SystemMountOps, UdevSource};

/// Automount daemon for removable block devices.
#[derive(Parser)]
#[command(name = "usb-automountd", version)]
#[command(about = "Mounts removable partitions under /media as they appear", long_about = None)]
struct Cli {}

fn main() {
    let _cli = Cli::parse();

    // Startup checks report to the terminal, before stderr is redirected.
    let source = match UdevSource::new() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("usb-automountd: {}", snafu::Report::from_error(e));
            std::process::exit(1);
        }
    };

    let mount_table = MountTable::new();
    if let Err(e) = mount_table.entries() {
        eprintln!("usb-automountd: {}", snafu::Report::from_error(e));
        std::process::exit(1);
    }

    if let Err(e) = daemon::daemonize(Path::new(daemon::LOG_FILE)) {
        eprintln!("usb-automountd: {}", snafu::Report::from_error(e));
        std::process::exit(1);
    }

    logging::init();
    info!(pid = std::process::id(), "usb-automountd started");

    if !daemon::is_root() {
        warn!("not running as root, mounts will fail unless setuid(0) is permitted");
    }
    if !daemon::is_directory(Path::new(DEFAULT_MOUNT_ROOT)) {
        warn!("{DEFAULT_MOUNT_ROOT} does not exist yet, it will be created on first mount");
    }

    let automounter = Automounter::new(mount_table, SystemMountOps::new());
    EventLoop::new(source, automounter).run()
}
