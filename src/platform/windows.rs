//! Windows process control and registry probing

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use windows::Win32::Foundation::{CloseHandle, FALSE};
use windows::Win32::System::Threading::{
    OpenProcess, SetProcessAffinityMask, PROCESS_SET_INFORMATION,
};

/// Pin a process to the logical CPUs set in `mask`.
pub fn set_affinity_mask(pid: u32, mask: i64) -> Result<()> {
    unsafe {
        let handle = OpenProcess(PROCESS_SET_INFORMATION, FALSE, pid)
            .context("failed to open process for affinity")?;
        let result = SetProcessAffinityMask(handle, mask as usize);
        let _ = CloseHandle(handle);
        result.context("SetProcessAffinityMask failed")?;
    }
    debug!(pid, mask = format!("{mask:#x}"), "affinity applied");
    Ok(())
}

/// JavaHome values registered by JDK installers.
pub fn registry_java_homes() -> Vec<PathBuf> {
    use winreg::enums::HKEY_LOCAL_MACHINE;
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let mut homes = Vec::new();

    for root in [
        "SOFTWARE\\JavaSoft\\JDK",
        "SOFTWARE\\JavaSoft\\Java Development Kit",
        "SOFTWARE\\Eclipse Adoptium\\JDK",
    ] {
        let Ok(key) = hklm.open_subkey(root) else {
            continue;
        };
        for version in key.enum_keys().flatten() {
            if let Ok(sub) = key.open_subkey(&version) {
                if let Ok(home) = sub.get_value::<String, _>("JavaHome") {
                    homes.push(PathBuf::from(home));
                }
                // Adoptium nests the MSI layout one level deeper.
                if let Ok(msi) = sub.open_subkey("hotspot\\MSI") {
                    if let Ok(home) = msi.get_value::<String, _>("Path") {
                        homes.push(PathBuf::from(home));
                    }
                }
            }
        }
    }

    homes
}
