//! The event loop.
//!
//! Single-threaded cooperative polling: each iteration checks the hotplug
//! source without blocking, handles at most one event, then sleeps for a
//! fixed interval whether or not anything happened. Mounts and unmounts run
//! to completion inside the iteration, so events are handled strictly in
//! order and never concurrently.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::event::EventSource;
use crate::executor::MountOps;
use crate::mtab::MountOracle;
use crate::registry::{Automounter, EventOutcome};

/// Pause between polls of the hotplug source.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Feeds hotplug events into an [`Automounter`].
pub struct EventLoop<S, O, M> {
    source: S,
    automounter: Automounter<O, M>,
}

impl<S: EventSource, O: MountOracle, M: MountOps> EventLoop<S, O, M> {
    pub fn new(source: S, automounter: Automounter<O, M>) -> Self {
        Self {
            source,
            automounter,
        }
    }

    pub fn automounter(&self) -> &Automounter<O, M> {
        &self.automounter
    }

    /// Runs one iteration without sleeping.
    ///
    /// Returns the outcome of the handled event, or None if no event was
    /// pending or it could not be received.
    pub fn tick(&mut self) -> Option<EventOutcome> {
        match self.source.poll_event() {
            Ok(Some(event)) => {
                let outcome = self.automounter.handle(&event);
                debug!(?outcome, "event handled");
                Some(outcome)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }

    /// Polls forever.
    pub fn run(mut self) -> ! {
        loop {
            self.tick();
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::event::DeviceEvent;
    use crate::mount::testing::FakeSystem;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};

    /// Replays a fixed script of poll results.
    struct ScriptedSource {
        script: VecDeque<Result<Option<DeviceEvent>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Option<DeviceEvent>>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl EventSource for ScriptedSource {
        fn poll_event(&mut self) -> Result<Option<DeviceEvent>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    fn bob() -> Result<String> {
        Ok("bob".to_string())
    }

    #[test]
    fn test_tick_drives_lifecycle() {
        let sys = FakeSystem::new();
        let source = ScriptedSource::new(vec![
            Ok(Some(DeviceEvent::partition("add", "/dev/sdb1").with_label("PHOTOS"))),
            Ok(None),
            Ok(Some(DeviceEvent::partition("remove", "/dev/sdb1"))),
        ]);
        let automounter = Automounter::new(&sys, &sys)
            .with_mount_root("/media")
            .with_user_lookup(bob);
        let mut event_loop = EventLoop::new(source, automounter);

        assert_eq!(
            event_loop.tick(),
            Some(EventOutcome::Mounted {
                mount_dir: PathBuf::from("/media/bob/PHOTOS")
            })
        );
        assert_eq!(
            event_loop.automounter().registry().get(Path::new("/dev/sdb1")),
            Some(Path::new("/media/bob/PHOTOS"))
        );
        assert_eq!(event_loop.tick(), None);
        assert!(matches!(
            event_loop.tick(),
            Some(EventOutcome::Unmounted {
                dir_removed: true,
                ..
            })
        ));
        assert!(event_loop.automounter().registry().is_empty());
        assert!(!sys.has_dir("/media/bob/PHOTOS"));
    }

    #[test]
    fn test_receive_error_does_not_stop_loop() {
        let sys = FakeSystem::new();
        let source = ScriptedSource::new(vec![
            Err(Error::HotplugReceive {
                source: std::io::Error::from(std::io::ErrorKind::Interrupted),
            }),
            Ok(Some(DeviceEvent::partition("add", "/dev/sdc1"))),
        ]);
        let automounter = Automounter::new(&sys, &sys).with_user_lookup(bob);
        let mut event_loop = EventLoop::new(source, automounter);

        assert_eq!(event_loop.tick(), None);
        assert!(matches!(
            event_loop.tick(),
            Some(EventOutcome::Mounted { .. })
        ));
        assert!(sys.is_mounted("/dev/sdc1"));
    }

    #[test]
    fn test_ignores_non_partition_events() {
        let sys = FakeSystem::new();
        let disk = DeviceEvent {
            devtype: "disk".to_string(),
            action: "add".to_string(),
            devnode: Some(PathBuf::from("/dev/sdb")),
            ..DeviceEvent::default()
        };
        let source = ScriptedSource::new(vec![Ok(Some(disk))]);
        let automounter = Automounter::new(&sys, &sys).with_user_lookup(bob);
        let mut event_loop = EventLoop::new(source, automounter);

        assert_eq!(event_loop.tick(), Some(EventOutcome::Ignored));
        assert!(sys.mount_calls.borrow().is_empty());
    }
}
