//! Mount operations module.
//!
//! This module sequences a single mount or unmount: preparing and
//! cleaning up the mount point directory around the privileged syscall and
//! consulting the mount table where the kernel's view matters.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::MountOps;
use crate::mtab::MountOracle;

/// Filesystem type used when the device does not report one.
pub const DEFAULT_FS_TYPE: &str = "vfat";

/// Mounts a device to the specified mount point.
///
/// The mount point is created if needed and removed again if this call
/// created it but the mount fails. A target that already has something
/// mounted on it is refused.
pub fn mount_device(
    ops: &impl MountOps,
    oracle: &impl MountOracle,
    devnode: &Path,
    target: &Path,
    fs_type: Option<&str>,
) -> Result<()> {
    if oracle.is_mount_point(target)? {
        return Err(Error::MountPointInUse {
            path: target.to_path_buf(),
        });
    }

    let created = ops.create_mount_point(target)?;
    let fs_type = fs_type
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_FS_TYPE);

    if let Err(err) = ops.mount(devnode, target, fs_type) {
        if created && let Err(cleanup) = ops.remove_mount_point(target) {
            warn!(
                mount_dir = %target.display(),
                "failed to remove mount point after failed mount: {cleanup}"
            );
        }
        return Err(err);
    }

    info!(
        devnode = %devnode.display(),
        mount_dir = %target.display(),
        fs_type,
        "mounted device"
    );
    Ok(())
}

/// Result of a successful unmount request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// The device was not mounted; nothing was done.
    NotMounted,
    /// The device was unmounted from `mount_dir`.
    Unmounted {
        mount_dir: PathBuf,
        /// Whether the (now empty) mount point directory was removed.
        dir_removed: bool,
    },
}

/// Unmounts a device and removes its mount point.
///
/// With `owned_dir` set, only a mount of `devnode` on that directory is
/// touched: if the device is mounted somewhere else (someone remounted it
/// by hand), that mount is left alone and the result is
/// [`UnmountOutcome::NotMounted`]. The owned directory is removed after a
/// successful unmount; a failed removal is logged but does not undo the
/// unmount.
///
/// Without `owned_dir`, the first mount of `devnode` in the mount table is
/// unmounted and its directory is kept.
pub fn unmount_device(
    ops: &impl MountOps,
    oracle: &impl MountOracle,
    devnode: &Path,
    owned_dir: Option<&Path>,
) -> Result<UnmountOutcome> {
    let mount_dir = match owned_dir {
        Some(owned) => {
            if !oracle.is_mounted_at(devnode, owned)? {
                debug!(
                    devnode = %devnode.display(),
                    mount_dir = %owned.display(),
                    "device not mounted on its managed mount point, leaving it alone"
                );
                return Ok(UnmountOutcome::NotMounted);
            }
            owned.to_path_buf()
        }
        None => match oracle.mount_dir_of(devnode)? {
            Some(dir) => dir,
            None => {
                debug!(devnode = %devnode.display(), "device not mounted, nothing to unmount");
                return Ok(UnmountOutcome::NotMounted);
            }
        },
    };

    ops.unmount(&mount_dir)?;
    info!(
        devnode = %devnode.display(),
        mount_dir = %mount_dir.display(),
        "unmounted device"
    );

    let dir_removed = owned_dir.is_some()
        && match ops.remove_mount_point(&mount_dir) {
            Ok(()) => true,
            Err(err) => {
                warn!(mount_dir = %mount_dir.display(), "{err}");
                false
            }
        };

    Ok(UnmountOutcome::Unmounted {
        mount_dir,
        dir_removed,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSystem;
    use super::*;

    const DEV: &str = "/dev/sdb1";
    const TARGET: &str = "/media/alice/BACKUP";

    #[test]
    fn test_mount_uses_fallback_fs_type() {
        let sys = FakeSystem::new();
        mount_device(&sys, &sys, Path::new(DEV), Path::new(TARGET), None).unwrap();

        let calls = sys.mount_calls.borrow();
        assert_eq!(calls[0].2, DEFAULT_FS_TYPE);
        assert!(sys.has_dir(TARGET));
        assert!(sys.is_mounted(DEV));
    }

    #[test]
    fn test_mount_uses_reported_fs_type() {
        let sys = FakeSystem::new();
        mount_device(&sys, &sys, Path::new(DEV), Path::new(TARGET), Some("exfat")).unwrap();
        assert_eq!(sys.mount_calls.borrow()[0].2, "exfat");
    }

    #[test]
    fn test_mount_refuses_occupied_target() {
        let sys = FakeSystem::new();
        sys.external_mount("/dev/sdc1", TARGET);

        let err = mount_device(&sys, &sys, Path::new(DEV), Path::new(TARGET), None).unwrap_err();
        assert!(matches!(err, Error::MountPointInUse { .. }));
        assert!(err.is_conflict());
        assert_eq!(sys.mount_count(DEV), 0);
    }

    #[test]
    fn test_failed_mount_removes_created_dir() {
        let mut sys = FakeSystem::new();
        sys.failing_fs_types.insert("bogus".to_string());

        let err = mount_device(&sys, &sys, Path::new(DEV), Path::new(TARGET), Some("bogus"))
            .unwrap_err();
        assert!(matches!(err, Error::Mount { .. }));
        assert!(!sys.has_dir(TARGET));
    }

    #[test]
    fn test_failed_mount_keeps_preexisting_dir() {
        let mut sys = FakeSystem::new();
        sys.busy_devices.insert(PathBuf::from(DEV));
        sys.dirs.borrow_mut().insert(PathBuf::from(TARGET));

        let err = mount_device(&sys, &sys, Path::new(DEV), Path::new(TARGET), None).unwrap_err();
        assert!(matches!(err, Error::MountBusy { .. }));
        assert!(sys.has_dir(TARGET));
    }

    #[test]
    fn test_unmount_not_mounted_is_noop() {
        let sys = FakeSystem::new();
        let outcome = unmount_device(&sys, &sys, Path::new(DEV), None).unwrap();
        assert_eq!(outcome, UnmountOutcome::NotMounted);
    }

    #[test]
    fn test_unmount_removes_owned_dir() {
        let sys = FakeSystem::new();
        mount_device(&sys, &sys, Path::new(DEV), Path::new(TARGET), None).unwrap();

        let outcome = unmount_device(&sys, &sys, Path::new(DEV), Some(Path::new(TARGET))).unwrap();
        assert_eq!(
            outcome,
            UnmountOutcome::Unmounted {
                mount_dir: PathBuf::from(TARGET),
                dir_removed: true,
            }
        );
        assert!(!sys.is_mounted(DEV));
        assert!(!sys.has_dir(TARGET));
    }

    #[test]
    fn test_unmount_leaves_foreign_mount_alone() {
        let sys = FakeSystem::new();
        sys.external_mount(DEV, "/mnt/elsewhere");

        let outcome = unmount_device(&sys, &sys, Path::new(DEV), Some(Path::new(TARGET))).unwrap();
        assert_eq!(outcome, UnmountOutcome::NotMounted);
        assert!(sys.is_mounted(DEV));
        assert!(sys.has_dir("/mnt/elsewhere"));
    }

    #[test]
    fn test_unmount_without_owned_dir_keeps_dir() {
        let sys = FakeSystem::new();
        sys.external_mount(DEV, "/mnt/elsewhere");

        let outcome = unmount_device(&sys, &sys, Path::new(DEV), None).unwrap();
        assert_eq!(
            outcome,
            UnmountOutcome::Unmounted {
                mount_dir: PathBuf::from("/mnt/elsewhere"),
                dir_removed: false,
            }
        );
        assert!(!sys.is_mounted(DEV));
        assert!(sys.has_dir("/mnt/elsewhere"));
    }

    #[test]
    fn test_unmount_failure_keeps_dir() {
        let mut sys = FakeSystem::new();
        sys.failing_unmounts.insert(PathBuf::from(TARGET));
        mount_device(&sys, &sys, Path::new(DEV), Path::new(TARGET), None).unwrap();

        let err = unmount_device(&sys, &sys, Path::new(DEV), Some(Path::new(TARGET))).unwrap_err();
        assert!(matches!(err, Error::Unmount { .. }));
        assert!(sys.has_dir(TARGET));
        assert!(sys.is_mounted(DEV));
    }

    #[test]
    fn test_removal_failure_does_not_undo_unmount() {
        let mut sys = FakeSystem::new();
        sys.failing_removals.insert(PathBuf::from(TARGET));
        mount_device(&sys, &sys, Path::new(DEV), Path::new(TARGET), None).unwrap();

        let outcome = unmount_device(&sys, &sys, Path::new(DEV), Some(Path::new(TARGET))).unwrap();
        assert!(matches!(
            outcome,
            UnmountOutcome::Unmounted {
                dir_removed: false,
                ..
            }
        ));
        assert!(!sys.is_mounted(DEV));
    }
}
