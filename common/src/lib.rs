//! Shared types and limits for the request probe
//!
//! This crate provides the signal layout and constants shared between
//! the eBPF kernel programs and the userspace daemon.

#![no_std]

pub mod types;
pub mod constants;

// Re-export commonly used types
pub use types::RawSignal;
pub use constants::*;
