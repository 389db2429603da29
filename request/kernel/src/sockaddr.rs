//! sys_enter_connect argument parsing

use aya_ebpf::{helpers::bpf_probe_read_user, programs::TracePointContext};
use probe_common::constants::AF_INET;

/// Offset of `uservaddr` in the syscalls:sys_enter_connect record
///
/// 8 bytes of common fields, 8 for `__syscall_nr` (padded), 8 for `fd`.
const USERVADDR_OFFSET: usize = 24;

/// Userspace struct sockaddr_in
#[repr(C)]
#[derive(Clone, Copy)]
struct SockaddrIn {
    sin_family: u16,
    sin_port: u16,   // network byte order
    sin_addr: u32,
    sin_zero: [u8; 8],
}

/// Read the destination port of an IPv4 connect() call
///
/// Returns Err for unreadable pointers and non-AF_INET families.
pub fn read_connect_port(ctx: &TracePointContext) -> Result<u16, i64> {
    let uservaddr: u64 = unsafe { ctx.read_at(USERVADDR_OFFSET)? };
    if uservaddr == 0 {
        return Err(-1);
    }

    let addr = unsafe { bpf_probe_read_user(uservaddr as *const SockaddrIn)? };
    if addr.sin_family != AF_INET {
        return Err(-2);
    }

    Ok(u16::from_be(addr.sin_port))
}
