//! In-memory window manager.
//!
//! Keeps a z-ordered stack of windows with an always-on-top band, owning
//! processes, and hung windows that never acknowledge a reposition. Used by
//! tests and by the daemon on hosts without a Win32 desktop.

use crate::platform::{Placement, PlatformError, WindowManager};
use crate::window::{ProcessInfo, WindowHandle, WindowId};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct HeadlessWindow {
    handle: WindowHandle,
    visible: bool,
    topmost: bool,
    hung: bool,
}

#[derive(Debug, Clone)]
struct HeadlessProcess {
    info: ProcessInfo,
    alive: bool,
}

#[derive(Debug, Default)]
struct HeadlessState {
    /// Top-level windows, topmost first.
    stack: Vec<HeadlessWindow>,
    processes: HashMap<u32, HeadlessProcess>,
    denied: HashSet<u32>,
    foreground: Option<WindowId>,
    reposition_calls: usize,
}

impl HeadlessState {
    fn find(&self, window: WindowId) -> Option<&HeadlessWindow> {
        self.stack.iter().find(|w| w.handle.id == window)
    }

    fn find_mut(&mut self, window: WindowId) -> Option<&mut HeadlessWindow> {
        self.stack.iter_mut().find(|w| w.handle.id == window)
    }

    fn topmost_count(&self) -> usize {
        self.stack.iter().take_while(|w| w.topmost).count()
    }

    fn insert(&mut self, window: HeadlessWindow) {
        let index = if window.topmost {
            0
        } else {
            self.topmost_count()
        };
        self.stack.insert(index, window);
    }
}

/// A window manager that lives entirely in memory.
#[derive(Debug)]
pub struct HeadlessWindowManager {
    state: Mutex<HeadlessState>,
    own_process_id: u32,
}

impl Default for HeadlessWindowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessWindowManager {
    /// Create an empty window manager whose own process id is the real one.
    pub fn new() -> Self {
        Self::with_process_id(std::process::id())
    }

    /// Create an empty window manager reporting `own_process_id` as the
    /// current process.
    pub fn with_process_id(own_process_id: u32) -> Self {
        Self {
            state: Mutex::new(HeadlessState::default()),
            own_process_id,
        }
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a running process.
    pub fn add_process(&self, id: u32, name: &str, version: Option<&str>) -> ProcessInfo {
        let info = ProcessInfo {
            id,
            name: name.to_string(),
            path: PathBuf::from(format!("C:\\Program Files\\{name}")),
            version: version.map(str::to_string),
        };
        self.state().processes.insert(
            id,
            HeadlessProcess {
                info: info.clone(),
                alive: true,
            },
        );
        info
    }

    /// Make inspecting a process fail with access denied.
    pub fn deny_process_access(&self, id: u32) {
        self.state().denied.insert(id);
    }

    /// Terminate a process and destroy all of its windows.
    pub fn exit_process(&self, id: u32) {
        let mut state = self.state();
        if let Some(process) = state.processes.get_mut(&id) {
            process.alive = false;
        }
        state.stack.retain(|w| w.handle.process_id != Some(id));
    }

    /// Open a visible window on top of the normal band.
    pub fn open_window(&self, id: WindowId, class_name: &str, title: &str, process_id: Option<u32>) {
        self.open(WindowHandle::new(id, class_name, title, process_id), true, false);
    }

    /// Open a visible window in the always-on-top band.
    pub fn open_topmost_window(
        &self,
        id: WindowId,
        class_name: &str,
        title: &str,
        process_id: Option<u32>,
    ) {
        self.open(WindowHandle::new(id, class_name, title, process_id), true, true);
    }

    /// Open a window that starts hidden.
    pub fn open_hidden_window(
        &self,
        id: WindowId,
        class_name: &str,
        title: &str,
        process_id: Option<u32>,
    ) {
        self.open(WindowHandle::new(id, class_name, title, process_id), false, false);
    }

    fn open(&self, handle: WindowHandle, visible: bool, topmost: bool) {
        let mut state = self.state();
        state.stack.retain(|w| w.handle.id != handle.id);
        state.insert(HeadlessWindow {
            handle,
            visible,
            topmost,
            hung: false,
        });
    }

    /// Destroy a window.
    pub fn destroy_window(&self, id: WindowId) {
        let mut state = self.state();
        state.stack.retain(|w| w.handle.id != id);
        if state.foreground == Some(id) {
            state.foreground = None;
        }
    }

    /// Make a window stop (or resume) acknowledging repositions.
    pub fn set_hung(&self, id: WindowId, hung: bool) {
        if let Some(window) = self.state().find_mut(id) {
            window.hung = hung;
        }
    }

    /// Change visibility from the application's side.
    pub fn set_visible(&self, id: WindowId, visible: bool) {
        if let Some(window) = self.state().find_mut(id) {
            window.visible = visible;
        }
    }

    /// All live windows, topmost first.
    pub fn stack(&self) -> Vec<WindowId> {
        self.state().stack.iter().map(|w| w.handle.id).collect()
    }

    /// All shown windows, topmost first.
    pub fn visible_windows(&self) -> Vec<WindowId> {
        self.state()
            .stack
            .iter()
            .filter(|w| w.visible)
            .map(|w| w.handle.id)
            .collect()
    }

    /// Number of bulk repositions issued so far.
    pub fn reposition_calls(&self) -> usize {
        self.state().reposition_calls
    }
}

impl WindowManager for HeadlessWindowManager {
    fn enumerate_top_level_windows(&self) -> Result<Vec<WindowHandle>, PlatformError> {
        Ok(self.state().stack.iter().map(|w| w.handle.clone()).collect())
    }

    fn top_window(&self) -> Option<WindowId> {
        self.state().stack.first().map(|w| w.handle.id)
    }

    fn window_below(&self, window: WindowId) -> Option<WindowId> {
        let state = self.state();
        let index = state.stack.iter().position(|w| w.handle.id == window)?;
        state.stack.get(index + 1).map(|w| w.handle.id)
    }

    fn reposition(
        &self,
        placements: &[Placement],
        preserve_order: bool,
    ) -> Result<Vec<WindowId>, PlatformError> {
        let mut state = self.state();
        state.reposition_calls += 1;

        let mut unresponsive = Vec::new();
        let mut committed = Vec::new();

        for placement in placements {
            let Some(window) = state.find_mut(placement.window) else {
                continue;
            };
            if window.hung {
                unresponsive.push(placement.window);
                continue;
            }
            window.visible = placement.visible;
            committed.push(placement.window);
        }

        if preserve_order && !committed.is_empty() {
            let mut lifted = Vec::with_capacity(committed.len());
            for id in &committed {
                if let Some(index) = state.stack.iter().position(|w| w.handle.id == *id) {
                    lifted.push(state.stack.remove(index));
                }
            }
            let (topmost, normal): (Vec<_>, Vec<_>) = lifted.into_iter().partition(|w| w.topmost);
            for (offset, window) in topmost.into_iter().enumerate() {
                state.stack.insert(offset, window);
            }
            let band = state.topmost_count();
            for (offset, window) in normal.into_iter().enumerate() {
                state.stack.insert(band + offset, window);
            }
        }

        Ok(unresponsive)
    }

    fn set_foreground(&self, window: WindowId) -> bool {
        let mut state = self.state();
        let accepted = state.find(window).is_some_and(|w| w.visible && !w.hung);
        if accepted {
            state.foreground = Some(window);
        }
        accepted
    }

    fn foreground_window(&self) -> Option<WindowId> {
        self.state().foreground
    }

    fn is_destroyed(&self, window: WindowId) -> bool {
        self.state().find(window).is_none()
    }

    fn is_visible(&self, window: WindowId) -> bool {
        self.state().find(window).is_some_and(|w| w.visible)
    }

    fn is_topmost(&self, window: WindowId) -> bool {
        self.state().find(window).is_some_and(|w| w.topmost)
    }

    fn process_info(&self, process_id: u32) -> Result<ProcessInfo, PlatformError> {
        let state = self.state();
        if state.denied.contains(&process_id) {
            return Err(PlatformError::AccessDenied(process_id));
        }
        state
            .processes
            .get(&process_id)
            .filter(|p| p.alive)
            .map(|p| p.info.clone())
            .ok_or(PlatformError::ProcessNotFound(process_id))
    }

    fn is_process_alive(&self, process_id: u32) -> bool {
        self.state()
            .processes
            .get(&process_id)
            .is_some_and(|p| p.alive)
    }

    fn current_process_id(&self) -> u32 {
        self.own_process_id
    }
}
