//! The window-desktop manager.
//!
//! [`DesktopManager`] wraps the generic [`WorkspaceManager`] with the
//! window-level operations: reconciliation against the live window list,
//! cut/paste, moving windows, suspend/resume and the unresponsive-window
//! recovery path.
//!
//! Every call drains the faults collected during its repositions. Each fault
//! is published as a [`DesktopEvent::UnresponsiveWindows`]; with an
//! [`UnresponsiveHandler`] registered the handler picks windows to ignore,
//! otherwise the first fault is returned as [`DesktopError::Unresponsive`]
//! after the operation has completed.

use crate::clipboard::WindowClipboard;
use crate::context::{DesktopContext, DesktopOptions};
use crate::desktop::Desktop;
use crate::error::{DesktopError, Result};
use crate::events::{DesktopEvent, UnresponsiveHandler};
use crate::manager::{WorkspaceId, WorkspaceManager};
use crate::persistence::PersistenceRegistry;
use crate::platform::WindowManager;
use crate::policy::WindowPolicy;
use crate::session::Session;
use crate::snapshot::WindowSnapshot;
use crate::watcher::SuspendWatcher;
use crate::window::WindowId;
use std::collections::HashSet;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Newly observed windows captured into the current desktop.
    pub added: usize,
    /// Destroyed windows swept from desktops and the clipboard.
    pub dropped: usize,
}

/// Result of suspending a desktop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspendReport {
    /// Persisted applications now held by the desktop.
    pub persisted: usize,
    /// Windows that could not be persisted, moved to the current desktop.
    pub released: Vec<WindowId>,
}

/// Owner of the window desktops.
pub struct DesktopManager {
    inner: WorkspaceManager<DesktopContext>,
    startup: WorkspaceId,
    handler: Option<Box<dyn UnresponsiveHandler>>,
}

impl std::fmt::Debug for DesktopManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopManager")
            .field("startup", &self.startup)
            .field("current", &self.inner.current())
            .field("desktops", &self.inner.ids())
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl DesktopManager {
    /// Create a manager whose startup desktop holds every window the policy
    /// manages right now.
    pub fn new(
        wm: Arc<dyn WindowManager>,
        policy: WindowPolicy,
        registry: PersistenceRegistry,
        options: DesktopOptions,
    ) -> Result<Self> {
        let context = DesktopContext::new(wm, policy, registry, options);
        let mut inner = WorkspaceManager::new(context);
        let startup = inner
            .set_startup_workspace(|_, id| Ok(Desktop::startup(id, DesktopContext::default_name(id))))?;

        let mut manager = Self {
            inner,
            startup,
            handler: None,
        };
        let report = manager.update_windows()?;
        info!(windows = report.added, "Desktop manager started");
        Ok(manager)
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<DesktopEvent> {
        self.inner.hooks().bus.subscribe()
    }

    /// Install the recovery path for unresponsive windows.
    pub fn set_unresponsive_handler(&mut self, handler: impl UnresponsiveHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    pub fn clear_unresponsive_handler(&mut self) {
        self.handler = None;
    }

    /// Replace the window policy. Windows already managed stay where they
    /// are; the new policy applies to windows captured from now on.
    pub fn set_policy(&mut self, policy: WindowPolicy) {
        self.inner.hooks_mut().policy = policy;
        debug!("Window policy replaced");
    }

    pub fn startup(&self) -> WorkspaceId {
        self.startup
    }

    pub fn current(&self) -> WorkspaceId {
        self.inner.current().unwrap_or(self.startup)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn desktop(&self, id: WorkspaceId) -> Option<&Desktop> {
        self.inner.get(id)
    }

    /// Desktops in creation order.
    pub fn desktops(&self) -> impl Iterator<Item = &Desktop> {
        self.inner.iter().map(|(_, desktop)| desktop)
    }

    pub fn clipboard(&self) -> &WindowClipboard {
        self.inner.hooks().clipboard()
    }

    pub fn snapshot(&self, window: WindowId) -> Option<&WindowSnapshot> {
        self.inner.hooks().arena().get(window)
    }

    pub fn window_manager(&self) -> &dyn WindowManager {
        self.inner.hooks().window_manager()
    }

    fn require(&mut self, id: WorkspaceId) -> Result<()> {
        self.inner.ensure_open()?;
        if self.inner.contains(id) {
            Ok(())
        } else {
            Err(self.inner.reject(format!("desktop {id} is not managed here")))
        }
    }

    /// Publish collected faults and let the handler resolve them.
    fn settle(&mut self) -> Result<()> {
        let faults = self.inner.hooks_mut().take_faults();
        if faults.is_empty() {
            return Ok(());
        }

        for fault in &faults {
            self.inner
                .hooks()
                .bus
                .publish(DesktopEvent::UnresponsiveWindows(fault.clone()));
        }

        let Some(handler) = self.handler.as_mut() else {
            return match faults.into_iter().next() {
                Some(fault) => Err(DesktopError::Unresponsive(fault)),
                None => Ok(()),
            };
        };

        for fault in &faults {
            let ignore = handler.windows_to_ignore(fault);
            let ctx = self.inner.hooks_mut();
            for window in ignore {
                if fault.windows.contains(&window) {
                    ctx.arena.set_ignored(window, true);
                    info!(window, desktop = %fault.desktop, "Ignoring unresponsive window");
                }
            }
        }
        Ok(())
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        let settled = self.settle();
        let value = result?;
        settled?;
        Ok(value)
    }

    /// Reconcile with the live window list: sweep destroyed windows, refresh
    /// the current desktop's visibility samples and capture new windows into
    /// the current desktop. Safe to run at any time.
    pub fn update_windows(&mut self) -> Result<ReconcileReport> {
        self.inner.ensure_open()?;
        let current = self.current();
        let (ctx, desktops) = self.inner.split_all_mut();
        let wm = Arc::clone(&ctx.wm);

        let gone = ctx.arena.sweep_destroyed(wm.as_ref());
        let gone_ids: HashSet<WindowId> = gone.iter().map(|(window, _)| *window).collect();
        for (window, owner) in &gone {
            if let Some(desktop) = owner.and_then(|d| desktops.get_mut(&d)) {
                desktop.forget_window(*window);
            }
        }
        ctx.clipboard.forget(&gone_ids);
        ctx.policy.forget_destroyed(wm.as_ref());

        let Some(desktop) = desktops.get_mut(&current) else {
            return Err(DesktopError::InvalidState(format!(
                "current desktop {current} is missing"
            )));
        };
        for window in desktop.windows() {
            ctx.arena.update(wm.as_ref(), *window);
        }

        let mut fresh = Vec::new();
        for handle in wm.enumerate_top_level_windows()? {
            if ctx.arena.contains(handle.id) {
                continue;
            }
            if let Some(window) = ctx.capture(handle) {
                fresh.push(window);
            }
        }
        desktop.attach_windows(wm.as_ref(), &mut ctx.arena, &fresh)?;

        let report = ReconcileReport {
            added: fresh.len(),
            dropped: gone.len(),
        };
        if report != ReconcileReport::default() {
            debug!(added = report.added, dropped = report.dropped, "Reconciled windows");
        }
        Ok(report)
    }

    /// Create an empty, hidden desktop.
    pub fn create_desktop(&mut self, name: Option<String>) -> Result<WorkspaceId> {
        let id = self.inner.create_empty_workspace()?;
        if let Some(name) = name {
            self.rename_desktop(id, name)?;
        }
        Ok(id)
    }

    /// Recreate a stored desktop, taking back its windows that are still alive.
    pub fn create_desktop_from_session(&mut self, session: Session) -> Result<WorkspaceId> {
        let result = self.inner.create_workspace_from_session(session);
        self.finish(result)
    }

    pub fn rename_desktop(&mut self, id: WorkspaceId, name: String) -> Result<()> {
        self.require(id)?;
        if let Some((_, desktop)) = self.inner.split_mut(id) {
            desktop.set_name(name);
        }
        Ok(())
    }

    /// Hide the current desktop and show `target`, resuming it if suspended.
    pub fn switch_to(&mut self, target: WorkspaceId) -> Result<()> {
        let result = self.inner.switch_to(target);
        self.finish(result)
    }

    /// Move everything on `from` into `into` and discard `from`.
    pub fn merge(&mut self, from: WorkspaceId, into: WorkspaceId) -> Result<()> {
        let result = self.inner.merge(from, into);
        self.finish(result)
    }

    /// Cut `window` and its hide-set from the current desktop onto the
    /// clipboard. Windows the policy does not manage are ignored; a managed
    /// window its application has hidden can still be cut.
    pub fn cut_window(&mut self, window: WindowId) -> Result<Vec<WindowId>> {
        self.update_windows()?;
        let current = self.current();

        let ctx = self.inner.hooks_mut();
        let Some(handle) = ctx.arena.get(window).map(|s| s.handle().clone()) else {
            debug!(window, "Cut of unmanaged window ignored");
            return Ok(Vec::new());
        };
        if !ctx.policy.keeps_managing(ctx.wm.as_ref(), &handle) {
            debug!(window, "Cut of filtered window ignored");
            return Ok(Vec::new());
        }
        if ctx.arena.owner(window) != Some(current) {
            return Err(self
                .inner
                .reject(format!("window {window} is not on the current desktop")));
        }

        let result = match self.inner.split_mut(current) {
            Some((ctx, desktop)) => {
                let set = ctx.hide_set_in(desktop, window);
                // Removal detaches even when hiding fails
                let removed = ctx.remove_from(desktop, &set);
                ctx.clipboard.push(&set);
                removed.map(|()| set)
            }
            None => Err(DesktopError::InvalidState(format!(
                "current desktop {current} is missing"
            ))),
        };
        if let Ok(set) = &result {
            info!(window, count = set.len(), "Cut windows");
        }
        self.finish(result)
    }

    /// Move every clipboard window onto the current desktop.
    pub fn paste_windows(&mut self) -> Result<Vec<WindowId>> {
        self.update_windows()?;
        let current = self.current();

        let result = match self.inner.split_mut(current) {
            Some((ctx, desktop)) => {
                let windows = ctx.clipboard.take_all();
                let added = ctx.add_to(desktop, &windows);
                if added.is_err() {
                    ctx.reclaim(&windows);
                }
                added.map(|()| windows)
            }
            None => Err(DesktopError::InvalidState(format!(
                "current desktop {current} is missing"
            ))),
        };
        self.finish(result)
    }

    /// Move `window` and its hide-set from its desktop to `target`.
    pub fn move_window(&mut self, window: WindowId, target: WorkspaceId) -> Result<Vec<WindowId>> {
        self.require(target)?;
        self.update_windows()?;

        let Some(owner) = self.inner.hooks().arena().owner(window) else {
            return Err(self
                .inner
                .reject(format!("window {window} is not on any desktop")));
        };
        if owner == target {
            return Ok(Vec::new());
        }
        if self.inner.get(target).is_some_and(Desktop::is_suspended) {
            return Err(DesktopError::InvalidState(format!(
                "desktop {target} is suspended"
            )));
        }

        let result = self.inner.with_pair(owner, target, |ctx, from, to| {
            let set = ctx.hide_set_in(from, window);
            ctx.transfer(from, to, &set)?;
            Ok(set)
        });
        if let Ok(set) = &result {
            info!(window, %owner, %target, count = set.len(), "Moved windows");
        }
        self.finish(result)
    }

    /// Persist the applications of a hidden desktop. Completion is signalled
    /// by [`DesktopEvent::DesktopSuspended`]. Suspending twice is a no-op.
    pub fn suspend_desktop(&mut self, id: WorkspaceId) -> Result<SuspendReport> {
        self.require(id)?;
        let current = self.current();
        if id == current {
            return Err(DesktopError::InvalidState(
                "the current desktop cannot be suspended".into(),
            ));
        }
        self.update_windows()?;

        let Some((ctx, desktop)) = self.inner.split_mut(id) else {
            return Err(DesktopError::InvalidState(format!("desktop {id} is missing")));
        };
        let Some(suspension) = desktop.suspend(ctx.wm.as_ref(), &mut ctx.arena, &ctx.registry)
        else {
            return Ok(SuspendReport {
                persisted: desktop.persisted_applications().len(),
                released: Vec::new(),
            });
        };

        if desktop.is_suspended() {
            let wm = Arc::clone(&ctx.wm);
            let processes = suspension.processes.clone();
            let watcher = SuspendWatcher::spawn(
                id,
                ctx.options.suspend_poll_interval,
                move || processes.iter().any(|pid| wm.is_process_alive(*pid)),
                ctx.bus.clone(),
            );
            desktop.set_watcher(watcher);
        }
        let report = SuspendReport {
            persisted: desktop.persisted_applications().len(),
            released: suspension.released,
        };

        let result = match self.inner.split_mut(current) {
            Some((ctx, desktop)) => ctx.add_to(desktop, &report.released),
            None => Ok(()),
        };
        self.finish(result.map(|()| report))
    }

    /// Relaunch a suspended desktop's applications. The desktop becomes
    /// current so relaunched windows land on it.
    pub fn resume_desktop(&mut self, id: WorkspaceId) -> Result<()> {
        self.require(id)?;
        if !self.inner.get(id).is_some_and(Desktop::is_suspended) {
            return Ok(());
        }

        if id == self.current() {
            if let Some((ctx, desktop)) = self.inner.split_mut(id) {
                desktop.resume(&ctx.registry);
            }
            return Ok(());
        }
        self.switch_to(id)
    }

    /// Serialize one desktop.
    pub fn store(&mut self, id: WorkspaceId) -> Result<Session> {
        self.require(id)?;
        if id == self.current() {
            self.update_windows()?;
        }
        match self.inner.get(id) {
            Some(desktop) => Ok(desktop.store(self.inner.hooks().arena())),
            None => Err(DesktopError::InvalidState(format!("desktop {id} is missing"))),
        }
    }

    /// Exclude windows of `desktop` from all future bulk operations.
    pub fn ignore_windows(&mut self, desktop: WorkspaceId, windows: &[WindowId]) -> Result<usize> {
        self.require(desktop)?;
        let held: Vec<WindowId> = match self.inner.get(desktop) {
            Some(d) => windows.iter().copied().filter(|w| d.contains(*w)).collect(),
            None => Vec::new(),
        };
        let ctx = self.inner.hooks_mut();
        for window in &held {
            ctx.arena.set_ignored(*window, true);
        }
        info!(%desktop, count = held.len(), "Ignoring windows");
        Ok(held.len())
    }

    /// Switch back to the startup desktop and make every managed window
    /// visible again. Later mutating calls fail with `InvalidState`.
    pub fn close(&mut self) -> Result<()> {
        let result = self.inner.close();
        self.finish(result)
    }
}

impl Drop for DesktopManager {
    fn drop(&mut self) {
        if !self.inner.is_closed() {
            if let Err(e) = self.close() {
                warn!("Failed to restore windows on drop: {}", e);
            }
        }
    }
}
