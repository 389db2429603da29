//! eBPF program loader
//!
//! Handles loading the eBPF object, attaching the request uprobes and the
//! connect tracepoint, and reading the kernel-side statistics map.

use anyhow::{Context, Result};
use aya::{
    maps::{perf::AsyncPerfEventArray, HashMap, MapData, MapError},
    programs::{TracePoint, UProbe},
    Bpf,
};
use log::{info, warn};
use probe_common::constants::*;
use std::path::{Path, PathBuf};

/// Result of attaching an optional eBPF program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachResult {
    /// Program successfully attached
    Attached,
    /// Program missing from the object or its attach point unavailable
    NotFound,
}

/// Signal counters maintained by the kernel programs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    pub total: u64,
    pub starts: u64,
    pub ends: u64,
    pub connects: u64,
    /// Connect calls skipped (non-IPv4 or unreadable address)
    pub skipped_connects: u64,
}

/// eBPF program loader and manager
pub struct ProbeLoader {
    ebpf: Bpf,
}

impl ProbeLoader {
    /// Load eBPF program from file or embedded bytecode
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to eBPF object file. If None, uses embedded bytecode.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        info!("Loading eBPF program...");

        let ebpf = if let Some(obj_path) = path {
            info!("Loading eBPF object from: {:?}", obj_path);
            let data = std::fs::read(&obj_path)
                .with_context(|| format!("Failed to read eBPF object file: {:?}", obj_path))?;
            Bpf::load(&data).context("Failed to load eBPF program")?
        } else {
            #[cfg(feature = "embedded")]
            {
                info!("Loading embedded eBPF program...");
                let data = include_bytes!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/../kernel/target/bpfel-unknown-none/release/request-probe"
                ));
                Bpf::load(data).context("Failed to load embedded eBPF program")?
            }
            #[cfg(not(feature = "embedded"))]
            {
                anyhow::bail!(
                    "No eBPF object file provided. Use --ebpf-object or compile with 'embedded' feature"
                );
            }
        };

        info!("eBPF program loaded successfully");

        Ok(Self { ebpf })
    }

    /// Attach the request start/end uprobes to `target`
    ///
    /// Both probes are required: without either one no request can be
    /// correlated.
    pub fn attach_uprobes(&mut self, target: &Path) -> Result<()> {
        info!("Attaching uprobes to {:?}...", target);

        let probes = [
            ("request_start", REQUEST_START_SYMBOL),
            ("request_end", REQUEST_END_SYMBOL),
        ];

        for (name, symbol) in probes {
            let program: &mut UProbe = self
                .ebpf
                .program_mut(name)
                .with_context(|| format!("{} program not found in eBPF object", name))?
                .try_into()
                .with_context(|| format!("Failed to get {} as UProbe", name))?;
            program
                .load()
                .with_context(|| format!("Failed to load {}", name))?;
            program
                .attach(Some(symbol), 0, target, None)
                .with_context(|| format!("Failed to attach {} to {}:{}", name, target.display(), symbol))?;
            info!("  ✓ Attached to {}", symbol);
        }

        Ok(())
    }

    /// Attach the connect tracepoint
    ///
    /// Connection sampling is optional. Returns NotFound if the program is
    /// missing or the tracepoint is unavailable on this kernel.
    pub fn attach_tracepoints(&mut self) -> Result<AttachResult> {
        info!("Attaching tracepoints...");

        let Some(prog) = self.ebpf.program_mut("connect_enter") else {
            warn!("  ⚠ connect_enter program not found (optional)");
            return Ok(AttachResult::NotFound);
        };

        let program: &mut TracePoint = prog
            .try_into()
            .context("Failed to get connect_enter as TracePoint")?;
        program.load().context("Failed to load connect_enter")?;

        match program.attach("syscalls", "sys_enter_connect") {
            Ok(_) => {
                info!("  ✓ Attached to syscalls:sys_enter_connect tracepoint");
                Ok(AttachResult::Attached)
            }
            Err(e) => {
                warn!(
                    "  ⚠ Failed to attach syscalls:sys_enter_connect (not available on this kernel): {}",
                    e
                );
                Ok(AttachResult::NotFound)
            }
        }
    }

    /// Get the perf event array carrying raw signals
    pub fn get_perf_array(&mut self) -> Result<AsyncPerfEventArray<MapData>> {
        let map = self
            .ebpf
            .take_map("EVENTS")
            .context("EVENTS map not found in eBPF object")?;

        AsyncPerfEventArray::try_from(map)
            .context("Failed to create AsyncPerfEventArray from EVENTS map")
    }

    /// Read the kernel-side signal counters
    pub fn kernel_stats(&self) -> Result<KernelStats> {
        let map = self
            .ebpf
            .map("STATS")
            .context("STATS map not found in eBPF object")?;
        let stats = HashMap::<_, u32, u64>::try_from(map)
            .context("Failed to open STATS as HashMap")?;

        let read = |index: u32| -> Result<u64> {
            match stats.get(&index, 0) {
                Ok(value) => Ok(value),
                Err(MapError::KeyNotFound) => Ok(0),
                Err(e) => Err(e).with_context(|| format!("Failed to read STATS[{}]", index)),
            }
        };

        Ok(KernelStats {
            total: read(STAT_TOTAL_SIGNALS)?,
            starts: read(STAT_START_SIGNALS)?,
            ends: read(STAT_END_SIGNALS)?,
            connects: read(STAT_CONNECT_SIGNALS)?,
            skipped_connects: read(STAT_SKIPPED_CONNECTS)?,
        })
    }
}
