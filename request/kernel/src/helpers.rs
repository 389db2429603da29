//! Helper functions for eBPF programs

use aya_ebpf::helpers::{bpf_get_current_pid_tgid, bpf_ktime_get_ns};

/// Get current timestamp in nanoseconds
#[inline(always)]
pub fn get_timestamp() -> u64 {
    unsafe { bpf_ktime_get_ns() }
}

/// Get current process ID
#[inline(always)]
pub fn get_pid() -> u32 {
    let pid_tgid = bpf_get_current_pid_tgid();
    (pid_tgid >> 32) as u32
}

/// Increment a statistics counter
#[inline(always)]
pub fn increment_stat(stat_id: u32) {
    use crate::maps::STATS;

    match STATS.get_ptr_mut(&stat_id) {
        Some(count) => unsafe { *count += 1 },
        None => {
            let _ = STATS.insert(&stat_id, &1u64, 0);
        }
    }
}
