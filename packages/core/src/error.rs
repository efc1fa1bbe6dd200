//! Unified error types for the usb-automount-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error` or `Errno`) appears in
//! different contexts.

use nix::errno::Errno;
use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Mount table cannot be opened or read.
    #[snafu(display("failed to read mount table at {}", path.display()))]
    MountTableRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Passwd lookup for the effective UID failed.
    #[snafu(display("failed to look up passwd entry for uid {uid}"))]
    UserLookup { uid: u32, source: Errno },

    /// No passwd entry exists for the effective UID.
    #[snafu(display("no passwd entry for uid {uid}"))]
    UnknownUser { uid: u32 },

    /// Path is too long to hand to the mount syscalls.
    #[snafu(display("path {} is too long", path.display()))]
    PathTooLong { path: PathBuf },

    /// Target path exists but is not a directory.
    #[snafu(display("mount point {} exists and is not a directory", path.display()))]
    MountPointNotDirectory { path: PathBuf },

    /// Target directory already has a filesystem mounted on it.
    #[snafu(display("mount point {} is already in use", path.display()))]
    MountPointInUse { path: PathBuf },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount point removal failed.
    #[snafu(display("failed to remove mount point at {}", path.display()))]
    RemoveMountPoint {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The kernel reported EBUSY for the mount.
    #[snafu(display("mount point {} is busy, cannot mount {device}", path.display()))]
    MountBusy { device: String, path: PathBuf },

    /// Mount syscall failed.
    #[snafu(display("failed to mount {device} on {}: {source}", path.display()))]
    Mount {
        device: String,
        path: PathBuf,
        source: Errno,
    },

    /// Unmount syscall failed.
    #[snafu(display("failed to unmount {}: {source}", path.display()))]
    Unmount { path: PathBuf, source: Errno },

    /// Could not fork the privileged child.
    #[snafu(display("failed to fork privileged helper"))]
    Fork { source: Errno },

    /// Waiting on the privileged child failed or it died abnormally.
    #[snafu(display("privileged helper did not exit cleanly: {message}"))]
    Wait { message: String },

    /// udev monitor could not be set up.
    #[snafu(display("failed to initialize hotplug monitor"))]
    HotplugInit { source: std::io::Error },

    /// A device event could not be read from the monitor.
    #[snafu(display("failed to receive hotplug event"))]
    HotplugReceive { source: std::io::Error },
}

impl Error {
    /// Returns true for resource conflicts (busy or occupied mount points).
    ///
    /// These are expected in normal operation and are logged at a lower
    /// severity than genuine OS failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::MountBusy { .. }
                | Error::MountPointInUse { .. }
                | Error::MountPointNotDirectory { .. }
        )
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for mount table read errors.
    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point removal errors.
    fn remove_mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountTableReadSnafu { path: path.into() })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }

    fn remove_mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(RemoveMountPointSnafu { path: path.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let busy = Error::MountBusy {
            device: "/dev/sdb1".to_string(),
            path: PathBuf::from("/media/alice/BACKUP"),
        };
        assert!(busy.is_conflict());

        let failed = Error::Mount {
            device: "/dev/sdb1".to_string(),
            path: PathBuf::from("/media/alice/BACKUP"),
            source: Errno::EINVAL,
        };
        assert!(!failed.is_conflict());
    }

    #[test]
    fn test_mount_error_carries_os_message() {
        let err = Error::Mount {
            device: "/dev/sdc1".to_string(),
            path: PathBuf::from("/media/bob/DATA"),
            source: Errno::ENODEV,
        };
        let message = err.to_string();
        assert!(message.contains("/dev/sdc1"));
        assert!(message.contains("/media/bob/DATA"));
        assert!(message.contains(Errno::ENODEV.desc()));
    }

    #[test]
    fn test_io_context() {
        let res: std::io::Result<()> = Err(std::io::Error::from(std::io::ErrorKind::NotFound));
        let err = res.mount_table_context("/etc/mtab").unwrap_err();
        assert!(matches!(err, Error::MountTableRead { .. }));
        assert_eq!(err.to_string(), "failed to read mount table at /etc/mtab");
    }
}
