//! Mount path resolution.
//!
//! Target directories are laid out as `<mount root>/<user>/<name>`, where the
//! name is the filesystem label, else the device model, else a fixed
//! default.
//!
//! Two devices sharing a label for the same user resolve to the same path.
//! This is a known limitation: the second mount is refused because the
//! directory is already a mount point, rather than being renamed.

use std::path::{Path, PathBuf};

use nix::unistd::{User, geteuid};

use crate::error::{Error, Result};
use crate::executor::MAX_SYSCALL_PATH;

/// Default directory under which per-user mount points are created.
pub const DEFAULT_MOUNT_ROOT: &str = "/media";

/// Name used when a device has neither a label nor a model string.
pub const DEFAULT_MOUNT_NAME: &str = "usb_label";

/// Picks the naming component for a device.
///
/// Preference order is label, then model, then [`DEFAULT_MOUNT_NAME`].
/// Hints that are blank or would not form a single path component are
/// treated as absent.
pub fn mount_name(label: Option<&str>, model: Option<&str>) -> String {
    label
        .and_then(sanitize_mount_name)
        .or_else(|| model.and_then(sanitize_mount_name))
        .unwrap_or_else(|| DEFAULT_MOUNT_NAME.to_string())
}

/// Turns a device-supplied string into a single path component.
fn sanitize_mount_name(raw: &str) -> Option<String> {
    let name = raw.trim().replace(['/', '\0'], "_");
    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}

/// Builds `mount_root/user/name`.
///
/// Fails if the result is too long to pass to the mount syscalls (see
/// [`MAX_SYSCALL_PATH`]).
pub fn resolve(user: &str, name: &str, mount_root: &Path) -> Result<PathBuf> {
    let path = mount_root.join(user).join(name);

    if path.as_os_str().len() >= MAX_SYSCALL_PATH {
        return Err(Error::PathTooLong { path });
    }

    Ok(path)
}

/// Returns the login name of the effective user.
pub fn current_user_name() -> Result<String> {
    let uid = geteuid();
    match User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(Error::UnknownUser { uid: uid.as_raw() }),
        Err(source) => Err(Error::UserLookup {
            uid: uid.as_raw(),
            source,
        }),
    }
}
