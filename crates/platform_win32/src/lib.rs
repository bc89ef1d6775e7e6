//! vdesk Platform Win32
//!
//! Windows implementation of the [`vdesk_core::WindowManager`] contract.
//!
//! This crate handles:
//! - Top-level window enumeration and z-order walking
//! - Bulk show/hide via DeferWindowPos, with hung windows probed first so a
//!   single frozen application cannot block the batch
//! - Process lookup (image path, file version, liveness)
//!
//! The Win32 code only builds on Windows; the configuration and the pure
//! helpers below are portable.

use std::path::Path;
use std::time::Duration;

#[cfg(windows)]
mod window_manager;

#[cfg(windows)]
pub use window_manager::Win32WindowManager;

/// Default time a window gets to acknowledge a reposition.
pub const DEFAULT_REPOSITION_TIMEOUT: Duration = Duration::from_millis(3000);

/// Configuration for the Win32 platform layer.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// How long each window may take to answer before it counts as unresponsive.
    pub reposition_timeout: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            reposition_timeout: DEFAULT_REPOSITION_TIMEOUT,
        }
    }
}

/// Executable file name of a process image path, e.g. `notepad.exe`.
pub fn process_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Format a fixed file version as a dotted string.
///
/// `ms` and `ls` are the most and least significant halves as stored in a
/// version resource.
pub fn format_file_version(ms: u32, ls: u32) -> String {
    format!("{}.{}.{}.{}", ms >> 16, ms & 0xffff, ls >> 16, ls & 0xffff)
}

/// Decode a UTF-16 buffer filled by a Win32 call that returned `len` characters.
pub fn decode_utf16(buffer: &[u16], len: usize) -> String {
    String::from_utf16_lossy(&buffer[..len.min(buffer.len())])
}
