//! Window and process identities.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Unique identifier for a window.
/// On Windows, this is the HWND cast to u64.
pub type WindowId = u64;

/// Immutable identity of one top-level window, with the attributes cached
/// when it was enumerated.
///
/// Liveness (destroyed, visible, topmost) is never cached here; ask the
/// [`WindowManager`](crate::WindowManager) instead. Equality and hashing use
/// the handle value only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowHandle {
    /// The OS window handle.
    pub id: WindowId,
    /// Window class name.
    pub class_name: String,
    /// Window title at enumeration time.
    pub title: String,
    /// Owning process, if it could be looked up.
    pub process_id: Option<u32>,
}

impl WindowHandle {
    /// Create a new window handle.
    pub fn new(
        id: WindowId,
        class_name: impl Into<String>,
        title: impl Into<String>,
        process_id: Option<u32>,
    ) -> Self {
        Self {
            id,
            class_name: class_name.into(),
            title: title.into(),
            process_id,
        }
    }
}

impl PartialEq for WindowHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WindowHandle {}

impl Hash for WindowHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Information about the process owning a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process ID.
    pub id: u32,
    /// Executable file name (e.g., "notepad.exe").
    pub name: String,
    /// Full path of the executable.
    pub path: PathBuf,
    /// Dotted file version, when known.
    pub version: Option<String>,
}
