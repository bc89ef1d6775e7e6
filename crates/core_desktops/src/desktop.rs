//! One virtual desktop.
//!
//! A [`Desktop`] holds window ids, front = topmost; the snapshot state behind
//! each id lives in the shared [`SnapshotArena`]. Operations take the window
//! manager and arena explicitly, so the desktop never owns live state.
//!
//! States: hidden (new desktops), visible (the startup desktop) and suspended,
//! where the window list is replaced by persisted applications.

use crate::error::{DesktopError, Result};
use crate::manager::WorkspaceId;
use crate::persistence::{PersistedApplication, PersistenceRegistry};
use crate::platform::{sort_by_z_order, Placement, WindowManager};
use crate::session::Session;
use crate::snapshot::SnapshotArena;
use crate::watcher::SuspendWatcher;
use crate::window::{WindowHandle, WindowId};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Result of a bulk reposition: the windows that did not acknowledge in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositionOutcome {
    pub unresponsive: Vec<WindowId>,
}

impl RepositionOutcome {
    pub fn is_clean(&self) -> bool {
        self.unresponsive.is_empty()
    }

    fn absorb(&mut self, unresponsive: Vec<WindowId>) {
        for window in unresponsive {
            if !self.unresponsive.contains(&window) {
                self.unresponsive.push(window);
            }
        }
    }
}

/// Result of suspending a desktop.
#[derive(Debug, Default)]
pub(crate) struct Suspension {
    /// Processes asked to save and exit.
    pub processes: Vec<u32>,
    /// Windows no provider could persist, now detached.
    pub released: Vec<WindowId>,
}

fn reposition(
    wm: &dyn WindowManager,
    placements: &[Placement],
    preserve_order: bool,
) -> Result<Vec<WindowId>> {
    if placements.is_empty() {
        return Ok(Vec::new());
    }
    Ok(wm.reposition(placements, preserve_order)?)
}

/// A named partition of the managed windows.
#[derive(Debug)]
pub struct Desktop {
    id: WorkspaceId,
    name: String,
    /// Front = topmost.
    windows: Vec<WindowId>,
    visible: bool,
    persisted: Vec<PersistedApplication>,
    /// Pending completion signals for the persisted applications.
    watchers: Vec<SuspendWatcher>,
}

impl Desktop {
    pub(crate) fn new(id: WorkspaceId, name: String) -> Self {
        Self {
            id,
            name,
            windows: Vec::new(),
            visible: false,
            persisted: Vec::new(),
            watchers: Vec::new(),
        }
    }

    /// The desktop that is on screen when the manager starts.
    pub(crate) fn startup(id: WorkspaceId, name: String) -> Self {
        Self {
            visible: true,
            ..Self::new(id, name)
        }
    }

    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Window ids, topmost first.
    pub fn windows(&self) -> &[WindowId] {
        &self.windows
    }

    pub fn contains(&self, window: WindowId) -> bool {
        self.windows.contains(&window)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// True exactly when persisted applications are held.
    pub fn is_suspended(&self) -> bool {
        !self.persisted.is_empty()
    }

    pub fn persisted_applications(&self) -> &[PersistedApplication] {
        &self.persisted
    }

    pub(crate) fn restore_applications(&mut self, applications: Vec<PersistedApplication>) {
        self.persisted.extend(applications);
    }

    /// Hand over the persisted applications together with the watchers still
    /// waiting for them to exit.
    pub(crate) fn take_suspension(&mut self) -> (Vec<PersistedApplication>, Vec<SuspendWatcher>) {
        (
            std::mem::take(&mut self.persisted),
            std::mem::take(&mut self.watchers),
        )
    }

    /// Take over watchers from a merged desktop; they now report this desktop.
    pub(crate) fn adopt_watchers(&mut self, watchers: Vec<SuspendWatcher>) {
        for watcher in watchers {
            watcher.retarget(self.id);
            self.watchers.push(watcher);
        }
    }

    pub(crate) fn set_watcher(&mut self, watcher: SuspendWatcher) {
        for previous in self.watchers.drain(..) {
            previous.cancel();
        }
        self.watchers.push(watcher);
    }

    /// Drop a destroyed window without touching the screen.
    pub(crate) fn forget_window(&mut self, window: WindowId) {
        self.windows.retain(|w| *w != window);
    }

    /// Handles of the non-ignored windows, topmost first.
    pub(crate) fn managed_handles(&self, arena: &SnapshotArena) -> Vec<WindowHandle> {
        self.windows
            .iter()
            .filter_map(|w| arena.get(*w))
            .filter(|s| !s.is_ignored())
            .map(|s| s.handle().clone())
            .collect()
    }

    /// Prepend windows not already held, in live z-order, and attach them.
    /// Returns true when one of them is not shown as its snapshot recorded.
    pub(crate) fn attach_windows(
        &mut self,
        wm: &dyn WindowManager,
        arena: &mut SnapshotArena,
        windows: &[WindowId],
    ) -> Result<bool> {
        let held: HashSet<WindowId> = self.windows.iter().copied().collect();
        let mut seen = HashSet::new();
        let fresh: Vec<WindowId> = windows
            .iter()
            .copied()
            .filter(|w| !held.contains(w) && arena.contains(*w) && seen.insert(*w))
            .collect();
        if fresh.is_empty() {
            return Ok(false);
        }
        if self.is_suspended() {
            return Err(DesktopError::InvalidState(format!(
                "desktop {} is suspended",
                self.id
            )));
        }

        let fresh = sort_by_z_order(wm, &fresh);
        for window in &fresh {
            arena.attach(*window, self.id);
        }

        let stale = fresh.iter().any(|w| {
            arena.get(*w).is_some_and(|s| {
                !s.is_ignored() && !wm.is_destroyed(*w) && wm.is_visible(*w) != s.is_visible()
            })
        });

        let mut windows = fresh;
        windows.append(&mut self.windows);
        self.windows = windows;
        Ok(stale)
    }

    /// Take ownership of `windows`. A visible desktop is re-shown when an
    /// added window is not in its recorded state. Already-held windows are skipped.
    pub fn add_windows(
        &mut self,
        wm: &dyn WindowManager,
        arena: &mut SnapshotArena,
        windows: &[WindowId],
    ) -> Result<RepositionOutcome> {
        let stale = self.attach_windows(wm, arena, windows)?;
        if self.visible && stale {
            return self.show(wm, arena);
        }
        Ok(RepositionOutcome::default())
    }

    /// Release `windows`, hiding them first when this desktop is visible.
    /// They are detached even if hiding partially failed.
    pub fn remove_windows(
        &mut self,
        wm: &dyn WindowManager,
        arena: &mut SnapshotArena,
        windows: &[WindowId],
    ) -> Result<RepositionOutcome> {
        let targets: Vec<WindowId> = windows
            .iter()
            .copied()
            .filter(|w| self.windows.contains(w))
            .collect();

        let mut result = Ok(RepositionOutcome::default());
        if self.visible {
            let mut placements = Vec::new();
            for window in &targets {
                arena.update(wm, *window);
                let hideable = arena
                    .get(*window)
                    .is_some_and(|s| !s.is_ignored() && !wm.is_destroyed(*window));
                if hideable {
                    placements.push(Placement::hide(*window));
                }
            }
            result = reposition(wm, &placements, false).map(|unresponsive| RepositionOutcome {
                unresponsive,
            });
        }

        self.windows.retain(|w| !targets.contains(w));
        for window in &targets {
            arena.detach(*window);
        }
        debug!(desktop = %self.id, count = targets.len(), "Removed windows");
        result
    }

    /// Bring every window back to its recorded visibility and relative
    /// z-order, then activate the first visible one.
    pub fn show(
        &mut self,
        wm: &dyn WindowManager,
        arena: &mut SnapshotArena,
    ) -> Result<RepositionOutcome> {
        self.visible = true;
        let mut outcome = RepositionOutcome::default();
        if self.windows.is_empty() {
            return Ok(outcome);
        }

        let live: Vec<(WindowId, bool)> = self
            .windows
            .iter()
            .filter_map(|w| arena.get(*w))
            .filter(|s| !s.is_ignored() && !wm.is_destroyed(s.id()))
            .map(|s| (s.id(), s.is_visible()))
            .collect();

        // Reordering must not lift normal windows over real topmost ones
        let (topmost, normal): (Vec<_>, Vec<_>) =
            live.iter().partition(|(w, _)| wm.is_topmost(*w));
        for group in [topmost, normal] {
            let placements: Vec<Placement> = group
                .iter()
                .map(|(window, visible)| Placement {
                    window: *window,
                    visible: *visible,
                })
                .collect();
            outcome.absorb(reposition(wm, &placements, true)?);
        }

        let focus = live
            .iter()
            .find(|(w, visible)| *visible && !outcome.unresponsive.contains(w))
            .map(|(w, _)| *w);
        if let Some(window) = focus {
            if !wm.set_foreground(window) {
                debug!(window, "Foreground request refused");
            }
        }

        Ok(outcome)
    }

    /// Hide every visible, non-ignored window together with its hide-set.
    ///
    /// `hide_set` maps one window and the desktop's managed windows to the
    /// windows that must disappear with it.
    pub fn hide(
        &mut self,
        wm: &dyn WindowManager,
        arena: &mut SnapshotArena,
        mut hide_set: impl FnMut(&WindowHandle, &[WindowHandle]) -> Vec<WindowId>,
    ) -> Result<RepositionOutcome> {
        if !self.visible {
            return Ok(RepositionOutcome::default());
        }

        self.windows = sort_by_z_order(wm, &self.windows);
        for window in &self.windows {
            arena.update(wm, *window);
        }

        let candidates = self.managed_handles(arena);
        let mut targets: Vec<WindowId> = Vec::new();
        for handle in &candidates {
            let shown = arena.get(handle.id).is_some_and(|s| s.is_visible());
            if !shown {
                continue;
            }
            for window in hide_set(handle, &candidates) {
                if !targets.contains(&window) {
                    targets.push(window);
                }
            }
        }

        let placements: Vec<Placement> = targets
            .into_iter()
            .filter(|w| candidates.iter().any(|c| c.id == *w) && !wm.is_destroyed(*w))
            .map(Placement::hide)
            .collect();

        self.visible = false;
        let unresponsive = reposition(wm, &placements, false)?;
        Ok(RepositionOutcome { unresponsive })
    }

    /// Persist the applications behind this desktop's windows.
    ///
    /// Returns `None` when already suspended. Ignored windows are dropped.
    /// When nothing could be persisted the desktop stays live. Otherwise the
    /// persisted processes' windows are forgotten and every other window is
    /// detached and returned in [`Suspension::released`].
    pub(crate) fn suspend(
        &mut self,
        wm: &dyn WindowManager,
        arena: &mut SnapshotArena,
        registry: &PersistenceRegistry,
    ) -> Option<Suspension> {
        if self.is_suspended() {
            return None;
        }

        let ignored: Vec<WindowId> = self
            .windows
            .iter()
            .copied()
            .filter(|w| arena.get(*w).map_or(true, |s| s.is_ignored()))
            .collect();
        for window in &ignored {
            arena.remove(*window);
        }
        self.windows.retain(|w| !ignored.contains(w));

        let mut by_process: BTreeMap<u32, Vec<WindowId>> = BTreeMap::new();
        for window in &self.windows {
            if let Some(pid) = arena.get(*window).and_then(|s| s.handle().process_id) {
                by_process.entry(pid).or_default().push(*window);
            }
        }

        let mut applications = Vec::new();
        let mut processes = Vec::new();
        for pid in by_process.keys() {
            let info = match wm.process_info(*pid) {
                Ok(info) => info,
                Err(e) => {
                    debug!(pid, "Cannot suspend process: {}", e);
                    continue;
                }
            };
            if let Some(application) = registry.suspend(&info) {
                applications.push(application);
                processes.push(*pid);
            }
        }

        if applications.is_empty() {
            info!(desktop = %self.id, "Nothing to persist, desktop stays live");
            return Some(Suspension::default());
        }

        let mut released = Vec::new();
        for window in std::mem::take(&mut self.windows) {
            let persisted = arena
                .get(window)
                .and_then(|s| s.handle().process_id)
                .is_some_and(|pid| processes.contains(&pid));
            if persisted {
                arena.remove(window);
            } else {
                arena.detach(window);
                released.push(window);
            }
        }

        self.persisted = applications;
        info!(
            desktop = %self.id,
            applications = self.persisted.len(),
            released = released.len(),
            "Suspended desktop"
        );
        Some(Suspension {
            processes,
            released,
        })
    }

    /// Relaunch every persisted application. Each one is best-effort; returns
    /// how many were relaunched.
    pub(crate) fn resume(&mut self, registry: &PersistenceRegistry) -> usize {
        for watcher in self.watchers.drain(..) {
            watcher.cancel();
        }

        let mut resumed = 0;
        for application in std::mem::take(&mut self.persisted) {
            match registry.resume(&application) {
                Ok(()) => resumed += 1,
                Err(e) => warn!(desktop = %self.id, "Resume failed: {}", e),
            }
        }
        if resumed > 0 {
            info!(desktop = %self.id, resumed, "Resumed desktop");
        }
        resumed
    }

    /// Capture the window identities and persisted payloads.
    pub fn store(&self, arena: &SnapshotArena) -> Session {
        Session {
            name: self.name.clone(),
            windows: self
                .windows
                .iter()
                .filter_map(|w| arena.get(*w))
                .map(|s| s.handle().clone())
                .collect(),
            applications: self.persisted.clone(),
        }
    }
}
