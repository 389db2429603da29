//! BPF map definitions for request signals

use aya_ebpf::{
    macros::map,
    maps::{HashMap, PerfEventArray},
};
use probe_common::{constants::MAX_STATS, types::RawSignal};

/// Perf event array carrying raw signals to userspace
#[map]
pub static EVENTS: PerfEventArray<RawSignal> = PerfEventArray::new(0);

/// Statistics counter map
///
/// Key: stat_id (see STAT_* constants)
/// Value: u64 counter
#[map]
pub static STATS: HashMap<u32, u64> = HashMap::with_max_entries(MAX_STATS, 0);
