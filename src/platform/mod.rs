//! Platform-specific process control

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub mod unix;

use anyhow::Result;

use crate::affinity::MASK_ALL;

/// Apply a CPU affinity bitmask to a running process.
///
/// A mask of 0 is invalid and ignored; [`MASK_ALL`] means no restriction
/// and is also a no-op. Affinity is advisory: callers log and continue on
/// failure rather than treating it as fatal.
pub fn set_affinity_mask(pid: u32, mask: i64) -> Result<()> {
    if mask == 0 || mask == MASK_ALL {
        return Ok(());
    }

    #[cfg(windows)]
    {
        windows::set_affinity_mask(pid, mask)
    }
    #[cfg(all(unix, target_os = "linux"))]
    {
        unix::set_affinity_mask(pid, mask)
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    {
        let _ = pid;
        anyhow::bail!("CPU affinity is not supported on this platform")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_masks_never_touch_the_process() {
        // Pid 0 would be rejected by any real affinity call; the guard
        // must return before one is made.
        assert!(set_affinity_mask(0, 0).is_ok());
        assert!(set_affinity_mask(0, MASK_ALL).is_ok());
    }
}
