//! Window-desktop hooks for the generic workspace manager.

use crate::clipboard::WindowClipboard;
use crate::desktop::{Desktop, RepositionOutcome};
use crate::error::{DesktopError, Result};
use crate::events::{EventBus, UnresponsiveWindowFault};
use crate::manager::{WorkspaceHooks, WorkspaceId};
use crate::persistence::PersistenceRegistry;
use crate::platform::{Placement, WindowManager};
use crate::policy::WindowPolicy;
use crate::session::Session;
use crate::snapshot::{SnapshotArena, WindowSnapshot};
use crate::window::{WindowHandle, WindowId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often a suspend watcher checks whether suspended processes exited.
pub const DEFAULT_SUSPEND_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for a desktop manager.
#[derive(Debug, Clone)]
pub struct DesktopOptions {
    pub suspend_poll_interval: Duration,
}

impl Default for DesktopOptions {
    fn default() -> Self {
        Self {
            suspend_poll_interval: DEFAULT_SUSPEND_POLL_INTERVAL,
        }
    }
}

/// Everything desktops share: the window manager, the snapshot arena, the
/// policy, persistence providers and the clipboard.
///
/// Partial reposition failures are collected as faults here and drained by
/// the owning [`DesktopManager`](crate::DesktopManager) after each call.
pub struct DesktopContext {
    pub(crate) wm: Arc<dyn WindowManager>,
    pub(crate) arena: SnapshotArena,
    pub(crate) policy: WindowPolicy,
    pub(crate) registry: PersistenceRegistry,
    pub(crate) clipboard: WindowClipboard,
    pub(crate) bus: EventBus,
    pub(crate) options: DesktopOptions,
    faults: Vec<UnresponsiveWindowFault>,
}

impl std::fmt::Debug for DesktopContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopContext")
            .field("arena", &self.arena)
            .field("clipboard", &self.clipboard)
            .field("registry", &self.registry)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

impl DesktopContext {
    pub fn new(
        wm: Arc<dyn WindowManager>,
        policy: WindowPolicy,
        registry: PersistenceRegistry,
        options: DesktopOptions,
    ) -> Self {
        Self {
            wm,
            arena: SnapshotArena::new(),
            policy,
            registry,
            clipboard: WindowClipboard::new(),
            bus: EventBus::new(),
            options,
            faults: Vec::new(),
        }
    }

    pub fn window_manager(&self) -> &dyn WindowManager {
        self.wm.as_ref()
    }

    pub fn arena(&self) -> &SnapshotArena {
        &self.arena
    }

    pub fn clipboard(&self) -> &WindowClipboard {
        &self.clipboard
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn default_name(id: WorkspaceId) -> String {
        format!("Desktop {}", id.0 + 1)
    }

    /// Keep the unresponsive windows of one reposition for the caller.
    pub(crate) fn record(&mut self, desktop: WorkspaceId, outcome: RepositionOutcome) {
        if outcome.is_clean() {
            return;
        }
        warn!(%desktop, windows = ?outcome.unresponsive, "Windows did not respond to reposition");
        match self.faults.iter_mut().find(|f| f.desktop == desktop) {
            Some(fault) => {
                for window in outcome.unresponsive {
                    if !fault.windows.contains(&window) {
                        fault.windows.push(window);
                    }
                }
            }
            None => self.faults.push(UnresponsiveWindowFault {
                desktop,
                windows: outcome.unresponsive,
            }),
        }
    }

    pub(crate) fn take_faults(&mut self) -> Vec<UnresponsiveWindowFault> {
        std::mem::take(&mut self.faults)
    }

    /// Snapshot a newly observed window if the policy manages it.
    pub(crate) fn capture(&mut self, handle: WindowHandle) -> Option<WindowId> {
        if !self.policy.window_filter(self.wm.as_ref(), &handle) {
            return None;
        }
        let id = handle.id;
        self.arena
            .insert(WindowSnapshot::capture(self.wm.as_ref(), handle));
        Some(id)
    }

    /// The hide-set of `window` among the windows of `desktop`.
    pub(crate) fn hide_set_in(&mut self, desktop: &Desktop, window: WindowId) -> Vec<WindowId> {
        let Some(handle) = self.arena.get(window).map(|s| s.handle().clone()) else {
            return vec![window];
        };
        let candidates = desktop.managed_handles(&self.arena);
        self.policy.hide_set(self.wm.as_ref(), &handle, &candidates)
    }

    /// Hide `desktop` using the window policy's hide-sets.
    pub(crate) fn hide_desktop(&mut self, desktop: &mut Desktop) -> Result<()> {
        let Self {
            wm, arena, policy, ..
        } = self;
        let wm: &dyn WindowManager = &**wm;
        let outcome = desktop.hide(wm, arena, |handle, candidates| {
            policy.hide_set(wm, handle, candidates)
        })?;
        self.record(desktop.id(), outcome);
        Ok(())
    }

    pub(crate) fn show_desktop(&mut self, desktop: &mut Desktop) -> Result<()> {
        let outcome = desktop.show(self.wm.as_ref(), &mut self.arena)?;
        self.record(desktop.id(), outcome);
        Ok(())
    }

    pub(crate) fn add_to(&mut self, desktop: &mut Desktop, windows: &[WindowId]) -> Result<()> {
        let outcome = desktop.add_windows(self.wm.as_ref(), &mut self.arena, windows)?;
        self.record(desktop.id(), outcome);
        Ok(())
    }

    pub(crate) fn remove_from(&mut self, desktop: &mut Desktop, windows: &[WindowId]) -> Result<()> {
        let outcome = desktop.remove_windows(self.wm.as_ref(), &mut self.arena, windows)?;
        self.record(desktop.id(), outcome);
        Ok(())
    }

    /// Move `windows` from one desktop to another. When a step fails, windows
    /// it left detached go onto the clipboard.
    pub(crate) fn transfer(
        &mut self,
        from: &mut Desktop,
        to: &mut Desktop,
        windows: &[WindowId],
    ) -> Result<()> {
        let result = self
            .remove_from(from, windows)
            .and_then(|()| self.add_to(to, windows));
        if result.is_err() {
            self.reclaim(windows);
        }
        result
    }

    /// Push the managed windows among `windows` that no desktop holds onto
    /// the clipboard, so reconciliation and close still reach them.
    pub(crate) fn reclaim(&mut self, windows: &[WindowId]) {
        let stray: Vec<WindowId> = windows
            .iter()
            .copied()
            .filter(|w| {
                self.arena.contains(*w)
                    && self.arena.owner(*w).is_none()
                    && !self.clipboard.contains(*w)
            })
            .collect();
        if !stray.is_empty() {
            warn!(windows = ?stray, "Keeping detached windows on the clipboard");
            self.clipboard.push(&stray);
        }
    }

    fn adopt_session_windows(
        &mut self,
        desktop: &mut Desktop,
        session_windows: &[WindowHandle],
        existing: &mut HashMap<WorkspaceId, Desktop>,
        adopted: &mut Vec<WindowId>,
    ) -> Result<()> {
        let live: HashMap<WindowId, WindowHandle> = self
            .wm
            .enumerate_top_level_windows()?
            .into_iter()
            .map(|h| (h.id, h))
            .collect();

        let mut captured = Vec::new();
        for stored in session_windows {
            // Handles get reused; a different class means a different window
            let Some(handle) = live
                .get(&stored.id)
                .filter(|h| h.class_name == stored.class_name)
            else {
                debug!(window = stored.id, "Session window is gone");
                continue;
            };

            if self.arena.contains(handle.id) {
                adopted.push(handle.id);
                match self.arena.owner(handle.id) {
                    Some(owner) => {
                        if let Some(from) = existing.get_mut(&owner) {
                            self.remove_from(from, &[handle.id])?;
                        }
                    }
                    None => {
                        self.clipboard.remove(handle.id);
                    }
                }
            } else if let Some(window) = self.capture(handle.clone()) {
                captured.push(window);
                adopted.push(window);
            }
        }

        // Freshly captured windows are still on screen
        let placements: Vec<Placement> = captured.iter().copied().map(Placement::hide).collect();
        if !placements.is_empty() {
            let unresponsive = self.wm.reposition(&placements, false)?;
            self.record(desktop.id(), RepositionOutcome { unresponsive });
        }

        self.add_to(desktop, adopted.as_slice())
    }
}

impl WorkspaceHooks for DesktopContext {
    type Workspace = Desktop;
    type Session = Session;

    fn create_empty(&mut self, id: WorkspaceId) -> Result<Desktop> {
        Ok(Desktop::new(id, Self::default_name(id)))
    }

    fn create_from_session(
        &mut self,
        id: WorkspaceId,
        session: Session,
        existing: &mut HashMap<WorkspaceId, Desktop>,
    ) -> Result<Desktop> {
        session.validate().map_err(DesktopError::Session)?;

        let mut desktop = Desktop::new(id, session.name);
        if !session.applications.is_empty() {
            desktop.restore_applications(session.applications);
            return Ok(desktop);
        }

        let mut adopted = Vec::new();
        let result = self.adopt_session_windows(&mut desktop, &session.windows, existing, &mut adopted);
        if let Err(e) = result {
            // The desktop is never registered, so nothing may stay attached to it
            for window in &adopted {
                if self.arena.owner(*window) == Some(id) {
                    self.arena.detach(*window);
                }
            }
            self.reclaim(&adopted);
            return Err(e);
        }
        info!(desktop = %id, windows = desktop.len(), "Restored desktop from session");
        Ok(desktop)
    }

    fn switch(&mut self, from: &mut Desktop, to: &mut Desktop) -> Result<()> {
        self.hide_desktop(from)?;
        if to.is_suspended() {
            to.resume(&self.registry);
        }
        self.show_desktop(to)
    }

    fn merge(&mut self, from: &mut Desktop, into: &mut Desktop) -> Result<()> {
        if from.is_suspended() && (into.is_visible() || !into.is_empty()) {
            return Err(DesktopError::ArgumentInvalid(format!(
                "suspended desktop {} can only merge into a hidden empty or suspended desktop",
                from.id()
            )));
        }
        if into.is_suspended() && !from.is_empty() {
            return Err(DesktopError::ArgumentInvalid(format!(
                "cannot move live windows into suspended desktop {}",
                into.id()
            )));
        }

        let windows = from.windows().to_vec();
        self.transfer(from, into, &windows)?;
        let (applications, watchers) = from.take_suspension();
        into.restore_applications(applications);
        into.adopt_watchers(watchers);
        Ok(())
    }

    fn close(&mut self, startup: WorkspaceId, desktops: &mut HashMap<WorkspaceId, Desktop>) -> Result<()> {
        let mut first_error = None;
        let mut gathered = Vec::new();

        for desktop in desktops.values_mut().filter(|d| d.id() != startup) {
            if desktop.is_suspended() {
                warn!(
                    desktop = %desktop.id(),
                    applications = desktop.persisted_applications().len(),
                    "Closing with a suspended desktop, its applications stay closed"
                );
            }
            let windows = desktop.windows().to_vec();
            if let Err(e) = self.remove_from(desktop, &windows) {
                first_error.get_or_insert(e);
            }
            gathered.extend(windows);
        }
        gathered.extend(self.clipboard.take_all());

        let all: Vec<WindowId> = self.arena.iter().map(|s| s.id()).collect();
        for window in all {
            self.arena.set_ignored(window, false);
        }

        let Some(desktop) = desktops.get_mut(&startup) else {
            return Err(DesktopError::InvalidState(format!(
                "startup desktop {startup} is missing"
            )));
        };
        let attached = desktop.attach_windows(self.wm.as_ref(), &mut self.arena, &gathered);
        if let Err(e) = attached {
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.show_desktop(desktop) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
