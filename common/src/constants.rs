//! Shared constants for the request probe
//!
//! These constants are used by both kernel and userspace programs
//! to ensure consistency in behavior and limits.

// ============================================================================
// Capacities
// ============================================================================

/// Maximum number of in-flight requests awaiting their end signal
pub const MAX_PENDING_REQUESTS: u32 = 192 * 1024;

/// Maximum number of buffered connection-attempt samples
pub const MAX_CONNECTION_SAMPLES: u32 = 500;

/// Default capacity of the completed-event channel
pub const DEFAULT_COMPLETION_CAPACITY: u32 = 8192;

/// Default number of distinct keys kept by the running-stats surface
pub const DEFAULT_AGGREGATE_KEYS: u32 = 4096;

/// Default number of latencies retained per window for percentiles
pub const DEFAULT_WINDOW_SAMPLES: u32 = 100_000;

/// Number of window reports buffered between aggregation and export
pub const DEFAULT_METRICS_BUFFER: u32 = 10;

// ============================================================================
// Signal Kinds (for RawSignal.kind)
// ============================================================================

/// Request processing started (ngx_http_process_request uprobe)
pub const SIGNAL_KIND_START: u8 = 0;

/// Request released (ngx_http_free_request uprobe)
pub const SIGNAL_KIND_END: u8 = 1;

/// Connection attempt (sys_enter_connect tracepoint)
pub const SIGNAL_KIND_CONNECT: u8 = 2;

// ============================================================================
// Attachment Points
// ============================================================================

/// Default binary the uprobes attach to
pub const DEFAULT_TARGET_BINARY: &str = "/usr/sbin/nginx";

/// Symbol marking the start of request processing
pub const REQUEST_START_SYMBOL: &str = "ngx_http_process_request";

/// Symbol marking the end of request processing
pub const REQUEST_END_SYMBOL: &str = "ngx_http_free_request";

// ============================================================================
// Address Families (from linux/socket.h)
// ============================================================================

/// IPv4 address family
pub const AF_INET: u16 = 2;

// ============================================================================
// Statistics Counter Indices (for STATS map)
// ============================================================================

/// Total number of signals emitted
pub const STAT_TOTAL_SIGNALS: u32 = 0;

/// Number of start signals
pub const STAT_START_SIGNALS: u32 = 1;

/// Number of end signals
pub const STAT_END_SIGNALS: u32 = 2;

/// Number of connect signals
pub const STAT_CONNECT_SIGNALS: u32 = 3;

/// Number of connect calls whose sockaddr could not be read or was not AF_INET
pub const STAT_SKIPPED_CONNECTS: u32 = 4;

/// Total number of statistics counters
pub const MAX_STATS: u32 = 5;
