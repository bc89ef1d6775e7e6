//! Background wait for suspended applications to release their resources.

use crate::events::{DesktopEvent, EventBus};
use crate::manager::WorkspaceId;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// A cancellable polling thread that publishes
/// [`DesktopEvent::DesktopSuspended`] once `probe` reports nothing left to release.
///
/// The event names the desktop the watcher is attached to when it fires,
/// which changes when the suspended applications are merged elsewhere.
#[derive(Debug)]
pub struct SuspendWatcher {
    cancel: Arc<AtomicBool>,
    desktop: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl SuspendWatcher {
    /// Start polling. `probe` returns true while some suspended application
    /// still holds resources.
    pub fn spawn<P>(desktop: WorkspaceId, interval: Duration, mut probe: P, bus: EventBus) -> Self
    where
        P: FnMut() -> bool + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let target = Arc::new(AtomicU32::new(desktop.0));
        let owner = Arc::clone(&target);

        let spawned = thread::Builder::new()
            .name(format!("vdesk-suspend-{desktop}"))
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    if !probe() {
                        let desktop = WorkspaceId(owner.load(Ordering::Acquire));
                        debug!(%desktop, "Suspended applications released their resources");
                        bus.publish(DesktopEvent::DesktopSuspended { desktop });
                        return;
                    }
                    thread::park_timeout(interval);
                }
                debug!(%desktop, "Suspend watcher cancelled");
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(%desktop, "Failed to start suspend watcher: {}", e);
                None
            }
        };

        Self {
            cancel,
            desktop: target,
            handle,
        }
    }

    /// The desktop the completion event will name.
    pub fn desktop(&self) -> WorkspaceId {
        WorkspaceId(self.desktop.load(Ordering::Acquire))
    }

    /// Report completion for `desktop` instead.
    pub(crate) fn retarget(&self, desktop: WorkspaceId) {
        self.desktop.store(desktop.0, Ordering::Release);
    }

    /// Whether the watcher has stopped, either cancelled or done.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop polling and wait for the thread to exit. No event is published
    /// after this returns.
    pub fn cancel(mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("Suspend watcher panicked");
            }
        }
    }
}

impl Drop for SuspendWatcher {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_publishes_once_when_probe_clears() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);

        let watcher = SuspendWatcher::spawn(
            WorkspaceId(3),
            Duration::from_millis(5),
            move || counter.fetch_add(1, Ordering::SeqCst) < 2,
            bus,
        );

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            event,
            DesktopEvent::DesktopSuspended {
                desktop: WorkspaceId(3)
            }
        );
        assert_eq!(polls.load(Ordering::SeqCst), 3);

        // The thread exits after publishing, so the channel closes
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
        watcher.cancel();
    }

    #[test]
    fn test_retargeted_watcher_reports_new_desktop() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let release = Arc::new(AtomicBool::new(false));
        let released = Arc::clone(&release);

        let watcher = SuspendWatcher::spawn(
            WorkspaceId(1),
            Duration::from_millis(5),
            move || !released.load(Ordering::SeqCst),
            bus,
        );
        watcher.retarget(WorkspaceId(4));
        assert_eq!(watcher.desktop(), WorkspaceId(4));
        release.store(true, Ordering::SeqCst);

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            DesktopEvent::DesktopSuspended {
                desktop: WorkspaceId(4)
            }
        );
        watcher.cancel();
    }

    #[test]
    fn test_cancel_stops_without_event() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        let watcher = SuspendWatcher::spawn(
            WorkspaceId(1),
            Duration::from_secs(60),
            || true,
            bus,
        );
        watcher.cancel();

        assert!(rx.try_recv().is_err());
    }
}
