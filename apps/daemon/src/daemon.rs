//! Process detachment.
//!
//! Turns the process into a background service: forks away from the
//! launching shell, starts a new session, and points the standard streams
//! at `/dev/null` (stdin) and the log file (stdout and stderr).
//!
//! Must run before any thread is spawned, since only the calling thread
//! survives the fork.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, Uid, dup2_stderr, dup2_stdin, dup2_stdout, fork, geteuid, setsid};
use snafu::{ResultExt, Snafu};

/// Log file the standard streams are redirected to.
pub const LOG_FILE: &str = "/var/log/mount_daemon.log";

#[derive(Debug, Snafu)]
pub enum DaemonizeError {
    #[snafu(display("fork failed"))]
    Fork { source: nix::Error },

    #[snafu(display("setsid failed"))]
    Setsid { source: nix::Error },

    #[snafu(display("failed to open {}", path.display()))]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to redirect {stream}"))]
    Redirect {
        stream: &'static str,
        source: nix::Error,
    },
}

/// Returns true if the process runs with an effective UID of root.
pub fn is_root() -> bool {
    geteuid() == Uid::from_raw(0)
}

/// Returns true if `path` exists and is a directory.
pub fn is_directory(path: &Path) -> bool {
    path.metadata().map(|m| m.is_dir()).unwrap_or(false)
}

/// Detaches from the controlling terminal.
///
/// The launching process exits immediately; only the detached child returns.
pub fn daemonize(log_file: &Path) -> Result<(), DaemonizeError> {
    // SAFETY: called from main before the logging worker or any other
    // thread exists.
    match unsafe { fork() }.context(ForkSnafu)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().context(SetsidSnafu)?;
    umask(Mode::empty());

    let null = File::open("/dev/null").context(OpenSnafu {
        path: PathBuf::from("/dev/null"),
    })?;
    dup2_stdin(&null).context(RedirectSnafu { stream: "stdin" })?;

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .mode(0o666)
        .open(log_file)
        .context(OpenSnafu { path: log_file })?;
    dup2_stdout(&log).context(RedirectSnafu { stream: "stdout" })?;
    dup2_stderr(&log).context(RedirectSnafu { stream: "stderr" })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_directory(dir.path()));

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(!is_directory(&file));
        assert!(!is_directory(&dir.path().join("missing")));
    }
}
