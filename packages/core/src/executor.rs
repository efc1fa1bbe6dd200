//! Privileged syscall execution.
//!
//! Mount and unmount run in a short-lived forked child that switches to
//! root with `setuid(0)` before issuing the syscall. The caller blocks until
//! the child exits, so operations are strictly sequential. The child reports
//! the syscall's errno through its exit status.
//!
//! [`MountOps`] is the seam between the mount/unmount sequencing in
//! [`crate::mount`] and the operating system.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Uid, fork, setuid};

use crate::error::{Error, IoResultExt, Result};

/// Permission bits for newly created mount points (rwxr-x---).
pub const MOUNT_POINT_MODE: u32 = 0o750;

/// Longest path (in bytes) passed to a syscall from the forked child.
///
/// nix converts shorter paths to C strings in a stack buffer; anything
/// longer would be heap-allocated, which the child must not do.
pub const MAX_SYSCALL_PATH: usize = 1024;

/// Filesystem operations needed to manage a mount point.
pub trait MountOps {
    /// Creates `path` (and missing parents) if absent.
    ///
    /// Returns true if the directory was created by this call.
    fn create_mount_point(&self, path: &Path) -> Result<bool>;

    /// Mounts `devnode` on `target` with `fs_type` and `MS_NOATIME`.
    fn mount(&self, devnode: &Path, target: &Path, fs_type: &str) -> Result<()>;

    /// Unmounts whatever is mounted on `target`.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Removes an empty mount point directory.
    fn remove_mount_point(&self, path: &Path) -> Result<()>;
}

impl<T: MountOps + ?Sized> MountOps for &T {
    fn create_mount_point(&self, path: &Path) -> Result<bool> {
        (**self).create_mount_point(path)
    }

    fn mount(&self, devnode: &Path, target: &Path, fs_type: &str) -> Result<()> {
        (**self).mount(devnode, target, fs_type)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        (**self).unmount(target)
    }

    fn remove_mount_point(&self, path: &Path) -> Result<()> {
        (**self).remove_mount_point(path)
    }
}

/// [`MountOps`] backed by real syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMountOps;

impl SystemMountOps {
    pub fn new() -> Self {
        Self
    }
}

impl MountOps for SystemMountOps {
    fn create_mount_point(&self, path: &Path) -> Result<bool> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => return Ok(false),
            Ok(_) => {
                return Err(Error::MountPointNotDirectory {
                    path: path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).mount_point_context(path),
        }

        match DirBuilder::new()
            .recursive(true)
            .mode(MOUNT_POINT_MODE)
            .create(path)
        {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e).mount_point_context(path),
        }
    }

    fn mount(&self, devnode: &Path, target: &Path, fs_type: &str) -> Result<()> {
        check_syscall_path(devnode)?;
        check_syscall_path(target)?;
        check_syscall_path(Path::new(fs_type))?;

        let outcome = run_as_root(|| {
            nix::mount::mount(
                Some(devnode),
                target,
                Some(fs_type),
                MsFlags::MS_NOATIME,
                None::<&str>,
            )
        })?;

        outcome.map_err(|errno| classify_mount_error(devnode, target, errno))
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        check_syscall_path(target)?;

        let outcome = run_as_root(|| nix::mount::umount2(target, MntFlags::empty()))?;

        outcome.map_err(|source| Error::Unmount {
            path: target.to_path_buf(),
            source,
        })
    }

    fn remove_mount_point(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).remove_mount_point_context(path)
    }
}

/// Fails with [`Error::PathTooLong`] unless `path` fits [`MAX_SYSCALL_PATH`].
pub fn check_syscall_path(path: &Path) -> Result<()> {
    if path.as_os_str().len() >= MAX_SYSCALL_PATH {
        return Err(Error::PathTooLong {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Maps a mount errno onto the error taxonomy.
///
/// `EBUSY` is a resource conflict; everything else is an OS failure.
pub fn classify_mount_error(devnode: &Path, target: &Path, errno: Errno) -> Error {
    let device = devnode.display().to_string();
    let path = target.to_path_buf();
    match errno {
        Errno::EBUSY => Error::MountBusy { device, path },
        source => Error::Mount {
            device,
            path,
            source,
        },
    }
}

/// Runs `op` as root in a forked child and waits for it.
///
/// The outer result reports failures of the fork/wait machinery itself;
/// the inner result is the outcome of `op` (or of `setuid` if the
/// privilege switch was refused).
pub fn run_as_root<F>(op: F) -> Result<std::result::Result<(), Errno>>
where
    F: FnOnce() -> nix::Result<()>,
{
    run_in_child(|| {
        setuid(Uid::from_raw(0))?;
        op()
    })
}

/// Forks, runs `op` in the child and returns its outcome to the parent.
///
/// `op` must not allocate, lock or log: only the calling thread survives
/// the fork, and any lock another thread (such as the log writer) held at
/// that moment stays locked forever in the child.
fn run_in_child<F>(op: F) -> Result<std::result::Result<(), Errno>>
where
    F: FnOnce() -> nix::Result<()>,
{
    // SAFETY: callers pass closures that only issue raw syscalls on paths
    // already checked against MAX_SYSCALL_PATH, so nix builds the C strings
    // on the stack. The child leaves through `_exit`, skipping destructors
    // and atexit handlers inherited from the parent.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let code = match op() {
                Ok(()) => 0,
                Err(errno) => errno as i32,
            };
            unsafe { nix::libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => loop {
            match waitpid(child, None) {
                Ok(status) => return decode_wait_status(status),
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(Error::Wait {
                        message: format!("waitpid({child}) failed: {errno}"),
                    });
                }
            }
        },
        Err(source) => Err(Error::Fork { source }),
    }
}

/// Turns the helper's wait status back into the syscall outcome.
fn decode_wait_status(status: WaitStatus) -> Result<std::result::Result<(), Errno>> {
    match status {
        WaitStatus::Exited(_, 0) => Ok(Ok(())),
        WaitStatus::Exited(_, code) => Ok(Err(Errno::from_raw(code))),
        WaitStatus::Signaled(pid, signal, _) => Err(Error::Wait {
            message: format!("helper {pid} killed by {signal}"),
        }),
        other => Err(Error::Wait {
            message: format!("unexpected wait status {other:?}"),
        }),
    }
}
