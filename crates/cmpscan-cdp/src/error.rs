//! Control-channel error types.

use thiserror::Error;

/// Error substrings that mean the frame or session went away mid-operation.
///
/// Frames reload faster than the collector can talk to them; these failures
/// are expected and never surfaced.
pub const IGNORABLE_ERRORS: &[&str] = &[
    "No frame for given id found",
    "Target closed",
    "Session closed",
    "Cannot find context with specified id",
];

/// Whether an error message belongs to the ignorable transport class.
pub fn is_ignorable_message(message: &str) -> bool {
    IGNORABLE_ERRORS.iter().any(|needle| message.contains(needle))
}

/// Errors from the browser control channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Failed to launch the Chrome browser process.
    #[error("failed to launch browser: {context}")]
    LaunchFailed {
        /// What went wrong during launch.
        context: String,
    },

    /// Navigation to a URL failed.
    #[error("navigation failed for {url}: {reason}")]
    NavigationFailed {
        /// The URL that failed to load.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// A command did not get a response in time.
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
        /// What we were waiting for.
        context: String,
    },

    /// The browser answered with a protocol-level error.
    #[error("CDP error: {0}")]
    Cdp(String),

    /// The response did not have the expected shape.
    #[error("unexpected CDP response: {0}")]
    Protocol(String),

    /// The connection to the browser is gone.
    #[error("Session closed.")]
    Closed,
}

impl ChannelError {
    /// Whether this error means the frame/session was torn down mid-flight.
    pub fn is_ignorable(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Cdp(message) | Self::Protocol(message) => is_ignorable_message(message),
            _ => false,
        }
    }
}
