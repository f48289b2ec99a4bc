//! System and per-server telemetry sampling, plus orphan-process reaping

use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, System,
};
use tracing::{debug, info, warn};

/// One telemetry sample, shaped for the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    /// Global CPU load, 0..100
    pub cpu_percent: f32,
    /// Used physical memory, 0..100
    pub ram_percent: f32,
    /// Per-server RAM as a percentage of that profile's configured cap
    pub server_ram: Vec<(String, f32)>,
}

/// Holds the `sysinfo` handle between refreshes so CPU deltas are real.
pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh and sample. `servers` pairs each running profile's pid with
    /// its configured RAM cap in MB.
    pub fn sample(&mut self, servers: &[(String, u32, u32)]) -> SystemStats {
        self.system
            .refresh_cpu_specifics(CpuRefreshKind::everything());
        self.system
            .refresh_memory_specifics(MemoryRefreshKind::everything());
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        let total = self.system.total_memory();
        let ram_percent = if total > 0 {
            (self.system.used_memory() as f32 / total as f32) * 100.0
        } else {
            0.0
        };

        let server_ram = servers
            .iter()
            .map(|(profile, pid, cap_mb)| {
                let used_mb = self
                    .system
                    .process(Pid::from_u32(*pid))
                    .map(|p| p.memory() / (1024 * 1024))
                    .unwrap_or(0);
                let percent = if *cap_mb > 0 {
                    ((used_mb as f32 / *cap_mb as f32) * 100.0).min(100.0)
                } else {
                    0.0
                };
                (profile.clone(), percent)
            })
            .collect();

        SystemStats {
            cpu_percent: self.system.global_cpu_usage(),
            ram_percent,
            server_ram,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Kill leftover Java processes still running out of a server directory.
///
/// Matches on working directory plus a `java` process name, so a crashed
/// front-end's children get cleaned up before the next launch. Entirely
/// best-effort: enumeration or kill failures are logged and ignored.
pub fn reap_orphans(server_dir: &Path) {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::everything(),
    );

    let mut reaped = 0usize;
    for (pid, process) in system.processes() {
        let name = process.name().to_string_lossy().to_lowercase();
        if !name.contains("java") {
            continue;
        }
        let Some(cwd) = process.cwd() else {
            continue;
        };
        if cwd != server_dir {
            continue;
        }
        debug!(pid = pid.as_u32(), dir = %server_dir.display(), "killing orphan");
        if process.kill() {
            reaped += 1;
        } else {
            warn!(pid = pid.as_u32(), "failed to kill orphaned java process");
        }
    }
    if reaped > 0 {
        info!(count = reaped, dir = %server_dir.display(), "reaped orphaned processes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_reports_percentages_in_range() {
        let mut sampler = SystemSampler::new();
        let stats = sampler.sample(&[]);
        assert!(stats.cpu_percent >= 0.0);
        assert!((0.0..=100.0).contains(&stats.ram_percent));
        assert!(stats.server_ram.is_empty());
    }

    #[test]
    fn dead_pid_samples_as_zero() {
        let mut sampler = SystemSampler::new();
        let stats = sampler.sample(&[("ghost".into(), u32::MAX - 1, 2048)]);
        assert_eq!(stats.server_ram, vec![("ghost".into(), 0.0)]);
    }

    #[test]
    fn zero_cap_never_divides() {
        let mut sampler = SystemSampler::new();
        let me = std::process::id();
        let stats = sampler.sample(&[("self".into(), me, 0)]);
        assert_eq!(stats.server_ram[0].1, 0.0);
    }

    #[test]
    fn reap_on_empty_dir_is_harmless() {
        let tmp = tempfile::tempdir().unwrap();
        reap_orphans(tmp.path());
    }
}
