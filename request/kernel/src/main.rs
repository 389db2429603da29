//! Request Probe - Kernel Space Programs
//!
//! Emits raw request signals from nginx and the socket layer. No
//! correlation happens here: every probe writes one `RawSignal` to the
//! EVENTS perf array and the daemon pairs starts with ends.
//!
//! ## Architecture
//!
//! ```text
//! ngx_http_process_request() -> Start(pid, ts)  --+
//! ngx_http_free_request()    -> End(pid, ts)    --+--> EVENTS perf array
//! sys_enter_connect          -> Connect(port)   --+
//!                                                  |
//!                                                  v
//! Userspace -> correlate, aggregate, export
//! ```
//!
//! ## Usage
//!
//! This program must be compiled for the bpfel-unknown-none target:
//!
//! ```bash
//! cargo build --release --target=bpfel-unknown-none -Z build-std=core
//! ```

#![no_std]
#![no_main]

mod handlers;
mod helpers;
mod maps;
mod sockaddr;

pub use handlers::{connect_enter, request_end, request_start};

pub use maps::{EVENTS, STATS};

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    // The verifier rejects any path that could reach this
    loop {}
}
