//! Collector error types and the shared channel-failure policy.

use cmpscan_cdp::ChannelError;
use thiserror::Error;

/// Errors that abort attaching a collector to a page.
///
/// Everything after a successful [`attach`](crate::CmpCollector::attach) is
/// best-effort and never surfaces as an error.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Enabling page events or registering the agent binding failed.
    #[error("failed to attach to page: {0}")]
    Attach(#[from] ChannelError),

    /// A detection pattern did not compile.
    #[error("invalid detection pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Pattern source.
        pattern: String,
        /// Compile error.
        #[source]
        source: regex::Error,
    },
}

/// Convenience alias for collector results.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Log a swallowed channel failure: torn-down frames at debug, the rest at warn.
pub(crate) fn log_channel_error(err: &ChannelError, operation: &str) {
    if err.is_ignorable() {
        tracing::debug!(operation, error = %err, "frame went away");
    } else {
        tracing::warn!(operation, error = %err, "channel operation failed");
    }
}
