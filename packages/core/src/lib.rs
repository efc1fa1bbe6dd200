//! usb-automount-core: Core library for the removable media automount daemon.
//!
//! Watches udev for block partitions being added or removed, mounts each new
//! partition under `/media/<user>/<label>` and unmounts it again, removing
//! the directory, when the device goes away.
//!
//! # Modules
//!
//! - [`event`]: Hotplug event model and the udev event source
//! - [`mtab`]: Mount table queries
//! - [`resolve`]: Mount point path resolution
//! - [`executor`]: Privileged mount/unmount syscalls
//! - [`mount`]: Mount and unmount sequences
//! - [`registry`]: Device registry and lifecycle state machine
//! - [`daemon`]: The polling event loop
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use usb_automount_core::{Automounter, EventLoop, MountTable, SystemMountOps, UdevSource};
//!
//! let source = UdevSource::new().unwrap();
//! let automounter = Automounter::new(MountTable::new(), SystemMountOps::new());
//! EventLoop::new(source, automounter).run();
//! ```

pub mod daemon;
pub mod error;
pub mod event;
pub mod executor;
pub mod mount;
pub mod mtab;
pub mod registry;
pub mod resolve;

// Re-export commonly used types
pub use daemon::EventLoop;
pub use error::{Error, Result};
pub use event::{DeviceEvent, EventSource, UdevSource};
pub use executor::{MountOps, SystemMountOps};
pub use mtab::{MountOracle, MountTable};
pub use registry::{Automounter, EventOutcome, Registry};
