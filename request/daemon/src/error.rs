//! Correlation error taxonomy
//!
//! None of these are fatal. Each is counted where it happens and returned
//! as a value so callers on the probe path can ignore it without unwinding.

use thiserror::Error;

use crate::types::ContextKey;

/// Non-fatal conditions raised while correlating signals
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationError {
    /// End signal with no pending start (never seen, evicted, or agent restarted)
    #[error("no pending start for context {0}")]
    UnmatchedEnd(ContextKey),

    /// Start signal arrived while the pending index was full
    #[error("pending index full, start for context {0} not stored")]
    IndexOverflow(ContextKey),

    /// Completed event dropped because the completion channel was full
    #[error("completion channel full, event for context {0} dropped")]
    ChannelSaturated(ContextKey),

    /// Connection sample dropped because the sample queue was full
    #[error("connection sample queue full, port {0} dropped")]
    QueueSaturated(u16),
}
