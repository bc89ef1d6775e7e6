//! Serializable form of one desktop.

use crate::persistence::PersistedApplication;
use crate::window::WindowHandle;
use serde::{Deserialize, Serialize};

/// A stored desktop: its name, the windows it held (topmost first) and, when
/// suspended, its persisted applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    #[serde(default)]
    pub windows: Vec<WindowHandle>,
    #[serde(default)]
    pub applications: Vec<PersistedApplication>,
}

impl Session {
    /// Whether this session was stored from a suspended desktop.
    pub fn is_suspended(&self) -> bool {
        !self.applications.is_empty()
    }

    /// Check the session can be restored: a desktop is either live or
    /// suspended, never both.
    pub fn validate(&self) -> Result<(), String> {
        if !self.windows.is_empty() && !self.applications.is_empty() {
            return Err(format!(
                "session '{}' holds both live windows and persisted applications",
                self.name
            ));
        }
        Ok(())
    }
}
