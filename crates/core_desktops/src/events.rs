//! Desktop notifications and the unresponsive-window recovery path.

use crate::manager::WorkspaceId;
use crate::window::WindowId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Windows that did not acknowledge a bulk reposition in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresponsiveWindowFault {
    /// Desktop the reposition was issued for.
    pub desktop: WorkspaceId,
    /// The windows that timed out.
    pub windows: Vec<WindowId>,
}

impl fmt::Display for UnresponsiveWindowFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} window(s) on desktop {} are not responding: {:?}",
            self.windows.len(),
            self.desktop,
            self.windows
        )
    }
}

/// Notifications published by a desktop manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesktopEvent {
    /// A bulk reposition left some windows unchanged.
    UnresponsiveWindows(UnresponsiveWindowFault),
    /// Every application of a suspended desktop has released its resources.
    DesktopSuspended { desktop: WorkspaceId },
}

/// Decides which unresponsive windows are excluded from future bulk operations.
pub trait UnresponsiveHandler: Send {
    fn windows_to_ignore(&mut self, fault: &UnresponsiveWindowFault) -> Vec<WindowId>;
}

/// Ignore every window that stopped responding.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreAll;

impl UnresponsiveHandler for IgnoreAll {
    fn windows_to_ignore(&mut self, fault: &UnresponsiveWindowFault) -> Vec<WindowId> {
        fault.windows.clone()
    }
}

impl<F> UnresponsiveHandler for F
where
    F: FnMut(&UnresponsiveWindowFault) -> Vec<WindowId> + Send,
{
    fn windows_to_ignore(&mut self, fault: &UnresponsiveWindowFault) -> Vec<WindowId> {
        self(fault)
    }
}

/// Fan-out of [`DesktopEvent`]s to any number of subscribers.
///
/// Cloned into background watchers; disconnected receivers are pruned on publish.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<DesktopEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<DesktopEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: DesktopEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
