//! Shared data structures between kernel and userspace
//!
//! These structures must be repr(C) to ensure consistent memory layout
//! between eBPF programs and userspace code.

use crate::constants::{SIGNAL_KIND_CONNECT, SIGNAL_KIND_END, SIGNAL_KIND_START};

/// Raw signal emitted by the instrumentation programs
///
/// One layout carries all three signal kinds; fields that do not apply
/// to a kind are zero.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawSignal {
    /// Monotonic timestamp when the probe fired (nanoseconds)
    pub timestamp_ns: u64,
    /// Execution context (process ID) for start/end signals
    pub key: u32,
    /// Destination port (host byte order) for connect signals
    pub port: u16,
    /// Signal kind (see SIGNAL_KIND_* constants)
    pub kind: u8,
    /// Padding for alignment
    pub _padding: u8,
}

impl RawSignal {
    /// Request entered the application handler
    pub const fn start(key: u32, timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            key,
            port: 0,
            kind: SIGNAL_KIND_START,
            _padding: 0,
        }
    }

    /// Request was released by the application
    pub const fn end(key: u32, timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            key,
            port: 0,
            kind: SIGNAL_KIND_END,
            _padding: 0,
        }
    }

    /// Outbound connection attempt observed at the syscall layer
    pub const fn connect(key: u32, port: u16, timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            key,
            port,
            kind: SIGNAL_KIND_CONNECT,
            _padding: 0,
        }
    }
}

// Compile-time layout checks
const _: () = {
    assert!(core::mem::size_of::<RawSignal>() == 16);
    assert!(core::mem::size_of::<RawSignal>() % core::mem::align_of::<RawSignal>() == 0);
};
