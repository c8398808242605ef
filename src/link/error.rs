//! Error taxonomy for the device link layer.
//!
//! Every failure a caller can observe maps onto one of these variants so the
//! surrounding application can distinguish recoverable conditions (rate
//! limiting, timeouts) from terminal ones (unsupported transport).

use std::time::Duration;

/// Errors produced by the link layer and its transports.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The platform has no usable transport of the requested kind.
    #[error("transport not supported on this platform")]
    NotSupported,

    /// The transport refuses to open outside a secure context.
    #[error("transport requires a secure context")]
    InsecureContext,

    /// Device busy, missing, or otherwise unopenable.
    #[error("port unavailable: {0}")]
    PortUnavailable(String),

    /// The user dismissed a port-selection dialog. Not a failure: `connect`
    /// swallows this and reports an unconnected (but healthy) link.
    #[error("port selection cancelled")]
    UserCancelled,

    /// The transport did not finish opening within its deadline.
    #[error("timed out opening transport")]
    OpenTimeout,

    /// No correlated response arrived within the per-call deadline.
    #[error("no response to '{command}' within {ms}ms", ms = .timeout.as_millis())]
    CommandTimeout { command: String, timeout: Duration },

    /// The sliding-window limiter denied the call. Callers may retry after
    /// the window drains; nothing was written to the device.
    #[error("outbound rate limit exceeded")]
    RateLimited,

    /// The link is not connected, or teardown rejected an in-flight call.
    #[error("link disconnected")]
    Disconnected,

    /// Checksum mismatch, unexpected reply shape, or another protocol-level
    /// violation (OTA aborts land here).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Generic transport I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Convenience alias used throughout the link layer.
pub type Result<T> = std::result::Result<T, LinkError>;

impl LinkError {
    /// True when the operation may simply be retried later without any
    /// state repair (the write never happened).
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::RateLimited | LinkError::CommandTimeout { .. })
    }
}
