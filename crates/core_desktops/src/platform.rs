//! The window-manager contract.
//!
//! Everything this crate knows about live windows comes through
//! [`WindowManager`]. The live state is owned by the OS and mutates under our
//! feet, so nothing read here is cached beyond one reconciliation pass.

use crate::window::{ProcessInfo, WindowHandle, WindowId};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

/// Errors reported by a window manager implementation.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Access denied while inspecting process {0}")]
    AccessDenied(u32),

    #[error("Process {0} not found")]
    ProcessNotFound(u32),

    #[error("Failed to enumerate windows: {0}")]
    EnumerationFailed(String),

    #[error("Failed to reposition windows: {0}")]
    RepositionFailed(String),
}

/// Target state for one window in a bulk reposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// The window to reposition.
    pub window: WindowId,
    /// Whether the window should end up shown or hidden.
    pub visible: bool,
}

impl Placement {
    /// Placement that shows a window.
    pub fn show(window: WindowId) -> Self {
        Self {
            window,
            visible: true,
        }
    }

    /// Placement that hides a window.
    pub fn hide(window: WindowId) -> Self {
        Self {
            window,
            visible: false,
        }
    }
}

/// A single-desktop, z-ordered, handle-addressable window manager.
///
/// Queries on a handle that has already been destroyed must answer as if the
/// window does not exist (not visible, not topmost, destroyed) rather than fail.
pub trait WindowManager: Send + Sync {
    /// Enumerate all top-level windows, in no particular order.
    fn enumerate_top_level_windows(&self) -> Result<Vec<WindowHandle>, PlatformError>;

    /// The topmost window in the z-order.
    fn top_window(&self) -> Option<WindowId>;

    /// The window directly below `window` in the z-order.
    fn window_below(&self, window: WindowId) -> Option<WindowId>;

    /// Show or hide a batch of windows.
    ///
    /// With `preserve_order`, the batch is also restacked so that its windows
    /// keep the given relative order (first = highest), at the top of their
    /// band: topmost windows among topmost windows, others directly below.
    ///
    /// Blocks until every window acknowledged or a bounded timeout elapsed.
    /// Returns the windows that did not acknowledge in time; their state is
    /// left unchanged while every other window's new state is committed.
    fn reposition(
        &self,
        placements: &[Placement],
        preserve_order: bool,
    ) -> Result<Vec<WindowId>, PlatformError>;

    /// Bring a window to the foreground. Returns false if the OS refused.
    fn set_foreground(&self, window: WindowId) -> bool;

    /// The current foreground window.
    fn foreground_window(&self) -> Option<WindowId>;

    /// Whether the handle no longer refers to a window.
    fn is_destroyed(&self, window: WindowId) -> bool;

    /// Whether the window is currently shown.
    fn is_visible(&self, window: WindowId) -> bool;

    /// Whether the window sits in the always-on-top band.
    fn is_topmost(&self, window: WindowId) -> bool;

    /// Look up the process owning windows.
    fn process_info(&self, process_id: u32) -> Result<ProcessInfo, PlatformError>;

    /// Whether a process is still running.
    fn is_process_alive(&self, process_id: u32) -> bool;

    /// The process this crate runs in; its windows are never managed.
    fn current_process_id(&self) -> u32 {
        std::process::id()
    }
}

/// Walk the z-order from the top and return every window, topmost first.
pub fn z_order(wm: &dyn WindowManager) -> Vec<WindowId> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut next = wm.top_window();

    while let Some(window) = next {
        // The z-order can change while we walk it
        if !seen.insert(window) {
            warn!(window, "Z-order walk revisited a window, stopping");
            break;
        }
        order.push(window);
        next = wm.window_below(window);
    }

    order
}

/// Sort `windows` by the live z-order, topmost first.
///
/// Windows the walk does not reach keep their relative order and go last.
pub fn sort_by_z_order(wm: &dyn WindowManager, windows: &[WindowId]) -> Vec<WindowId> {
    let wanted: HashSet<WindowId> = windows.iter().copied().collect();
    let mut sorted: Vec<WindowId> = z_order(wm)
        .into_iter()
        .filter(|w| wanted.contains(w))
        .collect();

    let reached: HashSet<WindowId> = sorted.iter().copied().collect();
    let mut leftover = HashSet::new();
    for &window in windows {
        if !reached.contains(&window) && leftover.insert(window) {
            sorted.push(window);
        }
    }

    sorted
}
