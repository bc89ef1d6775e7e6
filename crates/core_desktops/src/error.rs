//! Error taxonomy for desktop operations.

use crate::events::UnresponsiveWindowFault;
use crate::platform::PlatformError;
use crate::policy::PolicyError;
use thiserror::Error;

/// Errors that can occur during desktop operations.
#[derive(Debug, Error)]
pub enum DesktopError {
    /// A desktop or window that this manager does not own, or an
    /// incompatible merge. The manager has already been closed when a
    /// manager-level call returns this.
    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    /// The call was made before initialization, after close, or while the
    /// target is in a state that forbids it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Some windows did not acknowledge a bulk reposition in time.
    #[error("{0}")]
    Unresponsive(UnresponsiveWindowFault),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Invalid session: {0}")]
    Session(String),
}

impl DesktopError {
    /// Whether the caller can recover by marking windows ignored and retrying.
    pub fn is_unresponsive(&self) -> bool {
        matches!(self, DesktopError::Unresponsive(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = DesktopError> = std::result::Result<T, E>;
