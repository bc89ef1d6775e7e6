//! Window snapshots and the arena that owns them.
//!
//! Desktops hold window ids; the snapshot state lives here, keyed by id. A
//! snapshot's `desktop` field names the one desktop whose window list holds
//! it, or `None` while it sits on the clipboard.

use crate::manager::WorkspaceId;
use crate::platform::WindowManager;
use crate::window::{WindowHandle, WindowId};
use std::collections::HashMap;
use tracing::debug;

/// The system's mutable record of one managed window.
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    handle: WindowHandle,
    desktop: Option<WorkspaceId>,
    visible: bool,
    ignore: bool,
}

impl WindowSnapshot {
    /// Sample a window's visibility. Only meaningful while the window is on
    /// screen as its owning desktop shows it.
    pub(crate) fn capture(wm: &dyn WindowManager, handle: WindowHandle) -> Self {
        let visible = wm.is_visible(handle.id);
        Self {
            handle,
            desktop: None,
            visible,
            ignore: false,
        }
    }

    pub fn id(&self) -> WindowId {
        self.handle.id
    }

    pub fn handle(&self) -> &WindowHandle {
        &self.handle
    }

    /// The desktop holding this window, `None` while on the clipboard.
    pub fn desktop(&self) -> Option<WorkspaceId> {
        self.desktop
    }

    /// Visibility recorded at the last update; restored when the desktop is shown.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether bulk operations skip this window after it stopped responding.
    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    /// Re-sample visibility. Destroyed windows keep their last value.
    pub(crate) fn update(&mut self, wm: &dyn WindowManager) {
        if !wm.is_destroyed(self.handle.id) {
            self.visible = wm.is_visible(self.handle.id);
        }
    }
}

/// Owner of every snapshot, keyed by window id.
#[derive(Debug, Default)]
pub struct SnapshotArena {
    snapshots: HashMap<WindowId, WindowSnapshot>,
}

impl SnapshotArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, window: WindowId) -> Option<&WindowSnapshot> {
        self.snapshots.get(&window)
    }

    pub fn contains(&self, window: WindowId) -> bool {
        self.snapshots.contains_key(&window)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// The desktop holding `window`.
    pub fn owner(&self, window: WindowId) -> Option<WorkspaceId> {
        self.snapshots.get(&window).and_then(|s| s.desktop)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowSnapshot> {
        self.snapshots.values()
    }

    pub(crate) fn insert(&mut self, snapshot: WindowSnapshot) {
        self.snapshots.insert(snapshot.id(), snapshot);
    }

    pub(crate) fn remove(&mut self, window: WindowId) -> Option<WindowSnapshot> {
        self.snapshots.remove(&window)
    }

    pub(crate) fn attach(&mut self, window: WindowId, desktop: WorkspaceId) {
        if let Some(snapshot) = self.snapshots.get_mut(&window) {
            if let Some(previous) = snapshot.desktop.filter(|d| *d != desktop) {
                debug!(window, %previous, %desktop, "Re-parenting window still attached elsewhere");
            }
            snapshot.desktop = Some(desktop);
        }
    }

    pub(crate) fn detach(&mut self, window: WindowId) {
        if let Some(snapshot) = self.snapshots.get_mut(&window) {
            snapshot.desktop = None;
        }
    }

    pub(crate) fn update(&mut self, wm: &dyn WindowManager, window: WindowId) {
        if let Some(snapshot) = self.snapshots.get_mut(&window) {
            snapshot.update(wm);
        }
    }

    pub(crate) fn set_ignored(&mut self, window: WindowId, ignore: bool) {
        if let Some(snapshot) = self.snapshots.get_mut(&window) {
            snapshot.ignore = ignore;
        }
    }

    /// Drop every snapshot whose window is gone. Returns the dropped windows
    /// with the desktop that held them.
    pub(crate) fn sweep_destroyed(
        &mut self,
        wm: &dyn WindowManager,
    ) -> Vec<(WindowId, Option<WorkspaceId>)> {
        let gone: Vec<(WindowId, Option<WorkspaceId>)> = self
            .snapshots
            .values()
            .filter(|s| wm.is_destroyed(s.id()))
            .map(|s| (s.id(), s.desktop))
            .collect();

        for (window, _) in &gone {
            self.snapshots.remove(window);
        }
        gone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessWindowManager;

    #[test]
    fn test_capture_samples_visibility() {
        let wm = HeadlessWindowManager::new();
        wm.open_window(1, "A", "a", None);
        wm.open_hidden_window(2, "B", "b", None);

        let shown = WindowSnapshot::capture(&wm, WindowHandle::new(1, "A", "a", None));
        let hidden = WindowSnapshot::capture(&wm, WindowHandle::new(2, "B", "b", None));

        assert!(shown.is_visible());
        assert!(!hidden.is_visible());
        assert_eq!(shown.desktop(), None);
        assert!(!shown.is_ignored());
    }

    #[test]
    fn test_update_keeps_last_value_for_destroyed_window() {
        let wm = HeadlessWindowManager::new();
        wm.open_window(1, "A", "a", None);
        let mut snapshot = WindowSnapshot::capture(&wm, WindowHandle::new(1, "A", "a", None));

        wm.destroy_window(1);
        snapshot.update(&wm);
        assert!(snapshot.is_visible());
    }

    #[test]
    fn test_attach_detach_and_sweep() {
        let wm = HeadlessWindowManager::new();
        wm.open_window(1, "A", "a", None);
        wm.open_window(2, "B", "b", None);

        let mut arena = SnapshotArena::new();
        for id in [1, 2] {
            arena.insert(WindowSnapshot::capture(&wm, WindowHandle::new(id, "X", "x", None)));
        }
        arena.attach(1, WorkspaceId(0));
        assert_eq!(arena.owner(1), Some(WorkspaceId(0)));

        arena.detach(1);
        assert_eq!(arena.owner(1), None);

        arena.attach(2, WorkspaceId(3));
        wm.destroy_window(2);
        let gone = arena.sweep_destroyed(&wm);
        assert_eq!(gone, vec![(2, Some(WorkspaceId(3)))]);
        assert_eq!(arena.len(), 1);
    }
}
