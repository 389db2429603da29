//! Uprobe and tracepoint handlers
//!
//! Each handler emits exactly one RawSignal or nothing. Pairing and
//! latency arithmetic are left to userspace.

use aya_ebpf::{
    macros::{tracepoint, uprobe},
    programs::{ProbeContext, TracePointContext},
    EbpfContext,
};
use probe_common::{constants::*, types::RawSignal};

use crate::{helpers::*, maps::EVENTS, sockaddr::read_connect_port};

/// Request processing started
///
/// Attached to: ngx_http_process_request
#[uprobe]
pub fn request_start(ctx: ProbeContext) -> u32 {
    increment_stat(STAT_TOTAL_SIGNALS);
    increment_stat(STAT_START_SIGNALS);

    let signal = RawSignal::start(get_pid(), get_timestamp());
    emit(&ctx, &signal);
    0
}

/// Request released
///
/// Attached to: ngx_http_free_request
#[uprobe]
pub fn request_end(ctx: ProbeContext) -> u32 {
    increment_stat(STAT_TOTAL_SIGNALS);
    increment_stat(STAT_END_SIGNALS);

    let signal = RawSignal::end(get_pid(), get_timestamp());
    emit(&ctx, &signal);
    0
}

/// Outbound connection attempt
///
/// Attached to: syscalls:sys_enter_connect
#[tracepoint]
pub fn connect_enter(ctx: TracePointContext) -> u32 {
    match try_connect_enter(&ctx) {
        Ok(ret) => ret,
        Err(_) => {
            increment_stat(STAT_SKIPPED_CONNECTS);
            0
        }
    }
}

fn try_connect_enter(ctx: &TracePointContext) -> Result<u32, i64> {
    let port = read_connect_port(ctx)?;

    increment_stat(STAT_TOTAL_SIGNALS);
    increment_stat(STAT_CONNECT_SIGNALS);

    let signal = RawSignal::connect(get_pid(), port, get_timestamp());
    emit(ctx, &signal);
    Ok(0)
}

#[inline(always)]
fn emit<C: EbpfContext>(ctx: &C, signal: &RawSignal) {
    EVENTS.output(ctx, signal, 0);
}
