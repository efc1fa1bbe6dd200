//! Mount table queries.
//!
//! Read-only view over the live mount table (`/etc/mtab`). The table is
//! re-read on every query because other processes may mount and unmount
//! independently of this daemon.
//!
//! Device and directory fields are raw bytes: the kernel only escapes
//! whitespace and backslashes, so paths need not be valid UTF-8.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};

/// Default mount table path.
pub const MTAB_PATH: &str = "/etc/mtab";

/// Read-only questions the state machine asks about the mount table.
pub trait MountOracle {
    /// Returns the directory `devnode` is mounted on, if any.
    ///
    /// When the device appears more than once, the first entry wins.
    fn mount_dir_of(&self, devnode: &Path) -> Result<Option<PathBuf>>;

    /// Returns true if `devnode` is mounted on exactly `dir`.
    fn is_mounted_at(&self, devnode: &Path, dir: &Path) -> Result<bool>;

    /// Returns true if something is mounted on `dir`.
    fn is_mount_point(&self, dir: &Path) -> Result<bool>;
}

impl<T: MountOracle + ?Sized> MountOracle for &T {
    fn mount_dir_of(&self, devnode: &Path) -> Result<Option<PathBuf>> {
        (**self).mount_dir_of(devnode)
    }

    fn is_mounted_at(&self, devnode: &Path, dir: &Path) -> Result<bool> {
        (**self).is_mounted_at(devnode, dir)
    }

    fn is_mount_point(&self, dir: &Path) -> Result<bool> {
        (**self).is_mount_point(dir)
    }
}

/// Represents a single mount table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// The mounted device (e.g., "/dev/sdb1", "tmpfs").
    pub device: OsString,
    /// Directory the filesystem is mounted on.
    pub mount_dir: PathBuf,
    /// Filesystem type (e.g., "vfat", "ext4").
    pub fs_type: String,
    /// Mount options.
    pub options: Vec<String>,
}

impl MountEntry {
    /// Parses a single mount table line into an entry.
    ///
    /// Returns None for empty or truncated lines. The trailing dump and
    /// pass fields are optional and ignored.
    pub fn from_line(line: impl AsRef<[u8]>) -> Option<Self> {
        let mut parts = line
            .as_ref()
            .split(|b| b.is_ascii_whitespace())
            .filter(|field| !field.is_empty());
        let device = parts.next()?;
        let mount_dir = parts.next()?;
        let fs_type = parts.next()?;
        let options = parts.next()?;

        Some(Self {
            device: unescape_mount_field(device),
            mount_dir: PathBuf::from(unescape_mount_field(mount_dir)),
            fs_type: String::from_utf8_lossy(fs_type).into_owned(),
            options: String::from_utf8_lossy(options)
                .split(',')
                .map(|s| s.to_string())
                .collect(),
        })
    }

    /// Returns true if this entry mounts `devnode`.
    pub fn is_device(&self, devnode: &Path) -> bool {
        Path::new(&self.device) == devnode
    }
}

/// Unescapes octal sequences (`\040` and friends) used by the kernel for
/// whitespace and backslashes in mount table fields.
fn unescape_mount_field(input: &[u8]) -> OsString {
    let mut result = Vec::with_capacity(input.len());
    let mut index = 0;

    while index < input.len() {
        if input[index] == b'\\'
            && let Some(digits) = input.get(index + 1..index + 4)
            && digits.iter().all(|d| (b'0'..=b'7').contains(d))
            && let Ok(byte) = u8::try_from(
                digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0')),
            )
        {
            result.push(byte);
            index += 4;
            continue;
        }
        result.push(input[index]);
        index += 1;
    }
    OsString::from_vec(result)
}

/// Reads every entry of the mount table at `path`.
pub fn read_mount_table(path: &Path) -> Result<Vec<MountEntry>> {
    let content = fs::read(path).mount_table_context(path)?;

    Ok(content
        .split(|b| *b == b'\n')
        .filter_map(MountEntry::from_line)
        .collect())
}

/// Mount table backed by a file in mtab format.
#[derive(Debug, Clone)]
pub struct MountTable {
    path: PathBuf,
}

impl MountTable {
    /// Creates a view over the system mount table.
    pub fn new() -> Self {
        Self::at(MTAB_PATH)
    }

    /// Creates a view over a mount table at a custom path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path this table is read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads all current entries.
    pub fn entries(&self) -> Result<Vec<MountEntry>> {
        read_mount_table(&self.path)
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountOracle for MountTable {
    fn mount_dir_of(&self, devnode: &Path) -> Result<Option<PathBuf>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|entry| entry.is_device(devnode))
            .map(|entry| entry.mount_dir))
    }

    fn is_mounted_at(&self, devnode: &Path, dir: &Path) -> Result<bool> {
        Ok(self
            .entries()?
            .iter()
            .any(|entry| entry.is_device(devnode) && entry.mount_dir == dir))
    }

    fn is_mount_point(&self, dir: &Path) -> Result<bool> {
        Ok(self.entries()?.iter().any(|entry| entry.mount_dir == dir))
    }
}
