//! vdesk Core Desktop Engine
//!
//! Platform-agnostic virtual desktop engine.
//!
//! This crate partitions the operating system's top-level windows into
//! desktops and switches between them by hiding and showing windows:
//! - Every managed window has one [`WindowSnapshot`] in a shared arena,
//!   owned by exactly one desktop or by the clipboard
//! - Desktops restore their windows' visibility and relative z-order when shown
//! - Bulk show/hide calls tolerate hung windows and report them instead of blocking
//! - Desktops can be suspended into persisted application data and stored as sessions
//!
//! The window manager itself is reached through the [`WindowManager`] trait;
//! `vdesk-platform-win32` implements it for Windows and [`headless`] provides
//! an in-memory implementation.

mod clipboard;
mod context;
mod desktop;
mod desktop_manager;
mod error;
mod events;
pub mod headless;
mod manager;
mod persistence;
mod platform;
mod policy;
mod session;
mod snapshot;
mod watcher;
mod window;

pub use clipboard::WindowClipboard;
pub use context::{DesktopContext, DesktopOptions, DEFAULT_SUSPEND_POLL_INTERVAL};
pub use desktop::{Desktop, RepositionOutcome};
pub use desktop_manager::{DesktopManager, ReconcileReport, SuspendReport};
pub use error::{DesktopError, Result};
pub use events::{DesktopEvent, EventBus, IgnoreAll, UnresponsiveHandler, UnresponsiveWindowFault};
pub use manager::{WorkspaceHooks, WorkspaceId, WorkspaceManager};
pub use persistence::{
    ApplicationPersistence, PersistedApplication, PersistenceError, PersistenceProvider,
    PersistenceRegistry,
};
pub use platform::{sort_by_z_order, z_order, Placement, PlatformError, WindowManager};
pub use policy::{
    HideBehavior, IgnoreMode, IgnoreWindows, PolicyConfig, PolicyError, ProcessRule,
    WindowPattern, WindowPolicy,
};
pub use session::Session;
pub use snapshot::{SnapshotArena, WindowSnapshot};
pub use watcher::SuspendWatcher;
pub use window::{ProcessInfo, WindowHandle, WindowId};
