//! vdesk IPC Protocol
//!
//! Shared types for daemon-CLI communication. Each message is one JSON
//! object followed by a newline, over a named pipe on Windows and a Unix
//! domain socket elsewhere.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Named pipe path for IPC communication.
pub const PIPE_NAME: &str = r"\\.\pipe\vdesk";

/// Upper bound on a single request line, in bytes.
pub const MAX_IPC_MESSAGE_SIZE: usize = 64 * 1024;

/// File name of the Unix domain socket used off Windows.
pub const SOCKET_NAME: &str = "vdesk.sock";

/// Unix domain socket path, under the runtime directory when set.
pub fn socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
}

/// Errors when framing or parsing protocol messages.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Empty message")]
    Empty,
}

/// Commands that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// List every desktop.
    ListDesktops,
    /// Create an empty desktop.
    CreateDesktop {
        #[serde(default)]
        name: Option<String>,
    },
    /// Make a desktop current.
    SwitchDesktop { desktop: u32 },
    /// Move everything on `from` into `into` and discard `from`.
    MergeDesktops { from: u32, into: u32 },
    /// Rename a desktop.
    RenameDesktop { desktop: u32, name: String },

    /// Cut a window (the foreground window when omitted) onto the clipboard.
    CutWindow {
        #[serde(default)]
        window: Option<u64>,
    },
    /// Paste the clipboard onto the current desktop.
    PasteWindows,
    /// Move a window (the foreground window when omitted) to a desktop.
    MoveWindow {
        #[serde(default)]
        window: Option<u64>,
        desktop: u32,
    },

    /// Persist a hidden desktop's applications and close them.
    SuspendDesktop { desktop: u32 },
    /// Relaunch a suspended desktop's applications.
    ResumeDesktop { desktop: u32 },
    /// Exclude windows from future bulk operations.
    IgnoreWindows { desktop: u32, windows: Vec<u64> },

    /// Query the clipboard contents.
    QueryClipboard,
    /// Serialize a desktop.
    StoreSession { desktop: u32 },

    /// Re-enumerate windows and capture new ones.
    Refresh,
    /// Reload configuration from file.
    Reload,
    /// Stop the daemon.
    Stop,
}

/// Summary of one desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopInfo {
    pub id: u32,
    pub name: String,
    pub windows: usize,
    pub visible: bool,
    pub suspended: bool,
    pub applications: usize,
}

/// Responses from the daemon to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Command executed successfully.
    Ok,
    /// Command failed with an error.
    Error {
        /// Error message describing what went wrong.
        message: String,
    },
    /// Some windows did not respond; mark them ignored and retry.
    Unresponsive { desktop: u32, windows: Vec<u64> },
    /// Desktop list.
    Desktops {
        current: u32,
        startup: u32,
        desktops: Vec<DesktopInfo>,
    },
    /// A desktop was created.
    DesktopCreated { desktop: u32 },
    /// Windows affected by a cut, paste or move, or held by the clipboard.
    Windows { windows: Vec<u64> },
    /// Result of a suspend.
    Suspended {
        desktop: u32,
        persisted: usize,
        released: Vec<u64>,
    },
    /// A stored desktop session.
    Session { session: serde_json::Value },
    /// Result of a reconciliation pass.
    Refreshed { added: usize, dropped: usize },
}

impl IpcResponse {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Serialize a message as one protocol line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, IpcError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one protocol line.
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, IpcError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(IpcError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}
