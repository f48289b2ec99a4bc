//! Unix process control

#[cfg(target_os = "linux")]
use anyhow::{bail, Result};
#[cfg(target_os = "linux")]
use tracing::debug;

/// Pin a process to the logical CPUs set in `mask` via `sched_setaffinity`.
#[cfg(target_os = "linux")]
pub fn set_affinity_mask(pid: u32, mask: i64) -> Result<()> {
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        for bit in 0..63 {
            if mask & (1 << bit) != 0 {
                libc::CPU_SET(bit, &mut set);
            }
        }
    }

    let rc = unsafe {
        libc::sched_setaffinity(
            pid as libc::pid_t,
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        )
    };
    if rc != 0 {
        bail!(
            "sched_setaffinity failed for pid {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
    debug!(pid, mask = format!("{mask:#x}"), "affinity applied");
    Ok(())
}
