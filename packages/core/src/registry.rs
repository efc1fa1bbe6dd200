//! Device registry and mount lifecycle state machine.
//!
//! The [`Registry`] records which device nodes this daemon mounted and
//! where. [`Automounter`] is its only writer: it turns classified hotplug
//! events into mount and unmount sequences and updates the registry on
//! each state transition.
//!
//! Per device node the lifecycle is `Unmounted -> Mounted -> Unmounted`,
//! repeated for as long as devices come and go. The mount table is
//! consulted on every event and wins over the registry when they disagree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::event::{DeviceEvent, EventKind};
use crate::executor::MountOps;
use crate::mount::{UnmountOutcome, mount_device, unmount_device};
use crate::mtab::MountOracle;
use crate::resolve::{self, DEFAULT_MOUNT_ROOT};

/// Lifecycle state of a device node, as far as this daemon is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unmounted,
    Mounted,
}

/// Device node -> mount directory for devices mounted by this daemon.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    mounts: HashMap<PathBuf, PathBuf>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the directory `devnode` was mounted on.
    pub fn get(&self, devnode: &Path) -> Option<&Path> {
        self.mounts.get(devnode).map(PathBuf::as_path)
    }

    pub fn state(&self, devnode: &Path) -> DeviceState {
        if self.mounts.contains_key(devnode) {
            DeviceState::Mounted
        } else {
            DeviceState::Unmounted
        }
    }

    /// Records a mount, returning the entry it replaced.
    pub fn insert(&mut self, devnode: PathBuf, mount_dir: PathBuf) -> Option<PathBuf> {
        self.mounts.insert(devnode, mount_dir)
    }

    /// Forgets a device, returning its mount directory.
    pub fn remove(&mut self, devnode: &Path) -> Option<PathBuf> {
        self.mounts.remove(devnode)
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.mounts
            .iter()
            .map(|(dev, dir)| (dev.as_path(), dir.as_path()))
    }
}

/// What handling one event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not a partition add/remove.
    Ignored,
    /// The mount table could not be read; the event was dropped.
    Skipped,
    /// Add for a device that is already mounted somewhere.
    AlreadyMounted { mount_dir: PathBuf },
    /// Add completed; the device is now mounted.
    Mounted { mount_dir: PathBuf },
    /// Add failed; the device stays unmanaged.
    MountFailed,
    /// Remove for a device this daemon never mounted.
    NotManaged,
    /// Remove completed.
    Unmounted { mount_dir: PathBuf, dir_removed: bool },
    /// Remove could not unmount; the kernel mount may be orphaned.
    UnmountFailed { mount_dir: PathBuf },
}

/// Resolves the user name mount points are created for.
pub type UserLookup = fn() -> Result<String>;

/// Drives mount/unmount decisions for hotplug events.
pub struct Automounter<O, M> {
    oracle: O,
    ops: M,
    registry: Registry,
    mount_root: PathBuf,
    user_lookup: UserLookup,
}

impl<O: MountOracle, M: MountOps> Automounter<O, M> {
    /// Creates an automounter rooted at [`DEFAULT_MOUNT_ROOT`] that names
    /// mount points after the effective user.
    pub fn new(oracle: O, ops: M) -> Self {
        Self {
            oracle,
            ops,
            registry: Registry::new(),
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            user_lookup: resolve::current_user_name,
        }
    }

    pub fn with_mount_root(mut self, mount_root: impl Into<PathBuf>) -> Self {
        self.mount_root = mount_root.into();
        self
    }

    pub fn with_user_lookup(mut self, user_lookup: UserLookup) -> Self {
        self.user_lookup = user_lookup;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Handles one hotplug event.
    pub fn handle(&mut self, event: &DeviceEvent) -> EventOutcome {
        match event.kind() {
            EventKind::Add(devnode) => self.on_add(devnode, event),
            EventKind::Remove(devnode) => self.on_remove(devnode),
            EventKind::Ignored => {
                debug!(
                    devtype = %event.devtype,
                    action = %event.action,
                    "ignoring event"
                );
                EventOutcome::Ignored
            }
        }
    }

    fn on_add(&mut self, devnode: &Path, event: &DeviceEvent) -> EventOutcome {
        info!(devnode = %devnode.display(), "partition added");

        let current = match self.oracle.mount_dir_of(devnode) {
            Ok(current) => current,
            Err(err) => {
                warn!(devnode = %devnode.display(), "skipping add event: {err}");
                return EventOutcome::Skipped;
            }
        };

        if let Some(mount_dir) = current {
            debug!(
                devnode = %devnode.display(),
                mount_dir = %mount_dir.display(),
                "device already mounted"
            );
            return EventOutcome::AlreadyMounted { mount_dir };
        }

        if let Some(stale) = self.registry.remove(devnode) {
            warn!(
                devnode = %devnode.display(),
                mount_dir = %stale.display(),
                "dropping stale registry entry, device is no longer mounted"
            );
            self.remove_leftover_dir(&stale);
        }

        let target = match self.target_for(event) {
            Ok(target) => target,
            Err(err) => {
                error!(devnode = %devnode.display(), "cannot resolve mount point: {err}");
                return EventOutcome::MountFailed;
            }
        };

        match mount_device(
            &self.ops,
            &self.oracle,
            devnode,
            &target,
            event.fs_type.as_deref(),
        ) {
            Ok(()) => {
                self.registry.insert(devnode.to_path_buf(), target.clone());
                EventOutcome::Mounted { mount_dir: target }
            }
            Err(err) => {
                if err.is_conflict() {
                    warn!(devnode = %devnode.display(), "{err}");
                } else {
                    error!(devnode = %devnode.display(), "{err}");
                }
                EventOutcome::MountFailed
            }
        }
    }

    fn target_for(&self, event: &DeviceEvent) -> Result<PathBuf> {
        let user = (self.user_lookup)()?;
        let name = resolve::mount_name(event.label.as_deref(), event.model.as_deref());
        resolve::resolve(&user, &name, &self.mount_root)
    }

    fn on_remove(&mut self, devnode: &Path) -> EventOutcome {
        // The device is gone, so the entry goes whatever happens below.
        let Some(owned_dir) = self.registry.remove(devnode) else {
            debug!(devnode = %devnode.display(), "removed device was not mounted by us");
            return EventOutcome::NotManaged;
        };

        info!(devnode = %devnode.display(), "partition removed");

        match unmount_device(&self.ops, &self.oracle, devnode, Some(&owned_dir)) {
            Ok(UnmountOutcome::Unmounted {
                mount_dir,
                dir_removed,
            }) => EventOutcome::Unmounted {
                mount_dir,
                dir_removed,
            },
            Ok(UnmountOutcome::NotMounted) => {
                let dir_removed = self.remove_leftover_dir(&owned_dir);
                EventOutcome::Unmounted {
                    mount_dir: owned_dir,
                    dir_removed,
                }
            }
            Err(err) => {
                error!(
                    devnode = %devnode.display(),
                    mount_dir = %owned_dir.display(),
                    "unmount failed, mount may be orphaned: {err}"
                );
                EventOutcome::UnmountFailed {
                    mount_dir: owned_dir,
                }
            }
        }
    }

    /// Cleans up the directory of a device someone else already unmounted.
    fn remove_leftover_dir(&self, dir: &Path) -> bool {
        match self.oracle.is_mount_point(dir) {
            Ok(false) => {}
            Ok(true) => return false,
            Err(err) => {
                warn!(mount_dir = %dir.display(), "{err}");
                return false;
            }
        }
        match self.ops.remove_mount_point(dir) {
            Ok(()) => true,
            Err(err) => {
                warn!(mount_dir = %dir.display(), "{err}");
                false
            }
        }
    }
}
