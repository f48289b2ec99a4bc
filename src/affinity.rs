//! CPU affinity planning for server processes
//!
//! Pure topology heuristics over the CPU brand string and core counts, so
//! the interesting logic stays testable without real hardware. Applying a
//! mask to a pid lives in `platform`.

use sysinfo::{CpuRefreshKind, System};
use tracing::{debug, info};

/// Mask value meaning "no restriction" - callers treat it as a no-op.
pub const MASK_ALL: i64 = -1;

/// What a logical CPU index is believed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreKind {
    /// Intel hybrid performance core
    PCore,
    /// Intel hybrid efficiency core
    ECore,
    /// AMD core in the numbered CCD
    Ccd(u32),
    /// Topology unknown, treated uniformly
    Generic,
}

/// One logical CPU in planner order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreInfo {
    /// OS logical index, bit position in the mask
    pub index: usize,
    pub kind: CoreKind,
    /// Second SMT thread of a physical core
    pub is_secondary_thread: bool,
    /// P-cluster/E-cluster or CCD number
    pub cluster: u32,
}

/// Classify logical CPUs from the brand string and core counts.
///
/// Intel hybrid parts (>16 logical, fewer physical than logical) split
/// into hyperthreaded P-cores followed by E-cores. AMD parts group into
/// 8-core CCDs. Anything else is generic.
pub fn plan_topology(brand: &str, logical: usize, physical: usize) -> Vec<CoreInfo> {
    let lower = brand.to_lowercase();

    if lower.contains("intel") && logical > 16 && physical > 0 && physical < logical {
        // E-cores are single-threaded, so the HT surplus counts the P-cores.
        let p_cores = logical - physical;
        let p_threads = (p_cores * 2).min(logical);
        return (0..logical)
            .map(|index| {
                if index < p_threads {
                    CoreInfo {
                        index,
                        kind: CoreKind::PCore,
                        is_secondary_thread: index % 2 == 1,
                        cluster: 0,
                    }
                } else {
                    CoreInfo {
                        index,
                        kind: CoreKind::ECore,
                        is_secondary_thread: false,
                        cluster: 1,
                    }
                }
            })
            .collect();
    }

    if lower.contains("amd") || lower.contains("ryzen") {
        let smt = physical > 0 && logical == physical * 2;
        let threads_per_core = if smt { 2 } else { 1 };
        return (0..logical)
            .map(|index| {
                let physical_core = index / threads_per_core;
                let ccd = (physical_core / 8) as u32;
                CoreInfo {
                    index,
                    kind: CoreKind::Ccd(ccd),
                    is_secondary_thread: smt && index % 2 == 1,
                    cluster: ccd,
                }
            })
            .collect();
    }

    let smt = physical > 0 && logical == physical * 2;
    (0..logical)
        .map(|index| CoreInfo {
            index,
            kind: CoreKind::Generic,
            is_secondary_thread: smt && index % 2 == 1,
            cluster: 0,
        })
        .collect()
}

/// Pick the preferred subset of a topology and fold it into a bitmask.
///
/// Intel hybrid keeps every P-core thread, AMD keeps the first CCD's
/// primary threads, generic keeps every other index once the machine has
/// more than 16 logical CPUs. When the heuristic would not actually
/// restrict anything the result is [`MASK_ALL`].
pub fn plan_mask(cores: &[CoreInfo]) -> i64 {
    if cores.is_empty() || cores.len() > 63 {
        return MASK_ALL;
    }

    let selected: Vec<usize> = if cores.iter().any(|c| c.kind == CoreKind::PCore) {
        cores
            .iter()
            .filter(|c| c.kind == CoreKind::PCore)
            .map(|c| c.index)
            .collect()
    } else if cores.iter().any(|c| matches!(c.kind, CoreKind::Ccd(_))) {
        cores
            .iter()
            .filter(|c| c.cluster == 0 && !c.is_secondary_thread)
            .map(|c| c.index)
            .collect()
    } else if cores.len() > 16 {
        cores
            .iter()
            .filter(|c| c.index % 2 == 0)
            .take(16)
            .map(|c| c.index)
            .collect()
    } else {
        return MASK_ALL;
    };

    if selected.is_empty() || selected.len() == cores.len() {
        return MASK_ALL;
    }

    let mut mask: i64 = 0;
    for index in selected {
        mask |= 1 << index;
    }
    mask
}

/// Read the machine's CPU identity once and classify it.
pub fn topology() -> Vec<CoreInfo> {
    let mut system = System::new();
    system.refresh_cpu_specifics(CpuRefreshKind::everything());

    let brand = system
        .cpus()
        .first()
        .map(|c| c.brand().to_string())
        .unwrap_or_default();
    let logical = system.cpus().len();
    let physical = system.physical_core_count().unwrap_or(0);

    debug!(%brand, logical, physical, "cpu topology read");
    plan_topology(&brand, logical, physical)
}

/// Compute the smart mask for this machine.
pub fn smart_mask() -> i64 {
    let mask = plan_mask(&topology());
    info!(mask = format!("{mask:#x}"), "smart affinity planned");
    mask
}
