//! Hotplug events.
//!
//! [`DeviceEvent`] is an owned snapshot of one udev notification, holding
//! only the fields the automounter looks at. [`EventSource`] abstracts the
//! monitor so the loop can be driven by something other than udev.

use std::ffi::OsStr;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use snafu::ResultExt;

use crate::error::{HotplugInitSnafu, HotplugReceiveSnafu, Result};

/// Only events with this device type are acted upon.
pub const PARTITION_DEVTYPE: &str = "partition";

/// udev subsystem the monitor is filtered on.
pub const BLOCK_SUBSYSTEM: &str = "block";

/// udev property holding the filesystem type.
pub const PROP_FS_TYPE: &str = "ID_FS_TYPE";
/// udev property holding the filesystem label.
pub const PROP_FS_LABEL: &str = "ID_FS_LABEL";
/// udev property holding the device model.
pub const PROP_MODEL: &str = "ID_MODEL";

/// What the automounter should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind<'a> {
    /// A partition appeared at this device node.
    Add(&'a Path),
    /// A partition disappeared from this device node.
    Remove(&'a Path),
    /// Anything else.
    Ignored,
}

/// A single hotplug notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceEvent {
    pub devtype: String,
    pub action: String,
    pub devnode: Option<PathBuf>,
    pub fs_type: Option<String>,
    pub label: Option<String>,
    pub model: Option<String>,
}

impl DeviceEvent {
    /// Creates a partition event for `devnode`.
    pub fn partition(action: impl Into<String>, devnode: impl Into<PathBuf>) -> Self {
        Self {
            devtype: PARTITION_DEVTYPE.to_string(),
            action: action.into(),
            devnode: Some(devnode.into()),
            ..Self::default()
        }
    }

    pub fn with_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.fs_type = Some(fs_type.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Classifies the event.
    ///
    /// Non-partition devices, actions other than add/remove and events
    /// without a device node are ignored.
    pub fn kind(&self) -> EventKind<'_> {
        if self.devtype != PARTITION_DEVTYPE {
            return EventKind::Ignored;
        }
        let Some(devnode) = self.devnode.as_deref() else {
            return EventKind::Ignored;
        };
        match self.action.as_str() {
            "add" => EventKind::Add(devnode),
            "remove" => EventKind::Remove(devnode),
            _ => EventKind::Ignored,
        }
    }

    /// Snapshots a udev device.
    pub fn from_udev(device: &udev::Device) -> Self {
        Self {
            devtype: os_to_string(device.devtype()).unwrap_or_default(),
            action: os_to_string(device.action()).unwrap_or_default(),
            devnode: device.devnode().map(Path::to_path_buf),
            fs_type: os_to_string(device.property_value(PROP_FS_TYPE)),
            label: os_to_string(device.property_value(PROP_FS_LABEL)),
            model: os_to_string(device.property_value(PROP_MODEL)),
        }
    }
}

fn os_to_string(value: Option<&OsStr>) -> Option<String> {
    value.map(|v| v.to_string_lossy().into_owned())
}

/// A source of hotplug events.
pub trait EventSource {
    /// Returns the next pending event without blocking, if any.
    fn poll_event(&mut self) -> Result<Option<DeviceEvent>>;
}

/// udev netlink monitor filtered on block devices.
pub struct UdevSource {
    socket: udev::MonitorSocket,
}

impl UdevSource {
    /// Opens the monitor and starts receiving block device events.
    pub fn new() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .and_then(|builder| builder.match_subsystem(BLOCK_SUBSYSTEM))
            .and_then(|builder| builder.listen())
            .context(HotplugInitSnafu)?;
        Ok(Self { socket })
    }
}

impl EventSource for UdevSource {
    fn poll_event(&mut self) -> Result<Option<DeviceEvent>> {
        // SAFETY: the descriptor is owned by `self.socket`, which outlives
        // this borrow.
        let fd = unsafe { BorrowedFd::borrow_raw(self.socket.as_raw_fd()) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

        let ready = poll(&mut fds, PollTimeout::ZERO)
            .map_err(std::io::Error::from)
            .context(HotplugReceiveSnafu)?;
        if ready == 0 {
            return Ok(None);
        }

        Ok(self
            .socket
            .iter()
            .next()
            .map(|event| DeviceEvent::from_udev(&event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_partition_events() {
        let add = DeviceEvent::partition("add", "/dev/sdb1");
        assert_eq!(add.kind(), EventKind::Add(Path::new("/dev/sdb1")));

        let remove = DeviceEvent::partition("remove", "/dev/sdb1");
        assert_eq!(remove.kind(), EventKind::Remove(Path::new("/dev/sdb1")));
    }

    #[test]
    fn test_ignore_other_actions() {
        for action in ["change", "move", "bind", ""] {
            let event = DeviceEvent::partition(action, "/dev/sdb1");
            assert_eq!(event.kind(), EventKind::Ignored, "action {action:?}");
        }
    }

    #[test]
    fn test_ignore_whole_disks() {
        let event = DeviceEvent {
            devtype: "disk".to_string(),
            action: "add".to_string(),
            devnode: Some(PathBuf::from("/dev/sdb")),
            ..DeviceEvent::default()
        };
        assert_eq!(event.kind(), EventKind::Ignored);
    }

    #[test]
    fn test_ignore_missing_devnode() {
        let mut event = DeviceEvent::partition("add", "/dev/sdb1");
        event.devnode = None;
        assert_eq!(event.kind(), EventKind::Ignored);
    }

    #[test]
    fn test_builder_hints() {
        let event = DeviceEvent::partition("add", "/dev/sdb1")
            .with_fs_type("exfat")
            .with_label("BACKUP")
            .with_model("Cruzer");
        assert_eq!(event.fs_type.as_deref(), Some("exfat"));
        assert_eq!(event.label.as_deref(), Some("BACKUP"));
        assert_eq!(event.model.as_deref(), Some("Cruzer"));
    }
}
