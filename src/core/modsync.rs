//! One-way mod folder sync with a persisted removal blacklist
//!
//! The source folder is authoritative: jars missing from it are deleted
//! from the server's `mods` directory unless the server's blacklist names
//! them. The blacklist is how a mod removed after a conflict report stays
//! removed across restarts.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::BLACKLIST_FILE_NAME;

/// What one sync pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl SyncSummary {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

/// Mirror `source` into `<server_dir>/mods`.
///
/// New files are copied, stale files (size or mtime differ) re-copied,
/// target-only files deleted unless blacklisted. Blacklisted candidates
/// count as skipped.
pub fn sync_mods(source: &Path, server_dir: &Path) -> Result<SyncSummary> {
    let target = server_dir.join("mods");
    std::fs::create_dir_all(&target)
        .with_context(|| format!("creating mods dir {}", target.display()))?;
    let blacklist = load_blacklist(server_dir);

    let mut summary = SyncSummary::default();
    let mut source_names = HashSet::new();

    let entries = std::fs::read_dir(source)
        .with_context(|| format!("reading mods source {}", source.display()))?;
    for entry in entries.flatten() {
        let src_path = entry.path();
        if !src_path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        source_names.insert(name.clone());

        if blacklist.contains(&name) {
            summary.skipped += 1;
            debug!(file = %name, "blacklisted, not syncing");
            continue;
        }

        let dst_path = target.join(&name);
        if !dst_path.exists() {
            std::fs::copy(&src_path, &dst_path)
                .with_context(|| format!("copying {}", name))?;
            summary.added += 1;
        } else if is_stale(&src_path, &dst_path) {
            std::fs::copy(&src_path, &dst_path)
                .with_context(|| format!("updating {}", name))?;
            summary.updated += 1;
        }
    }

    // Target-only files disappear unless the blacklist protects them.
    if let Ok(entries) = std::fs::read_dir(&target) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if source_names.contains(&name) {
                continue;
            }
            if blacklist.contains(&name) {
                summary.skipped += 1;
                continue;
            }
            if let Err(err) = std::fs::remove_file(entry.path()) {
                warn!(file = %name, %err, "failed to remove stray mod");
            } else {
                summary.removed += 1;
            }
        }
    }

    info!(
        source = %source.display(),
        added = summary.added,
        updated = summary.updated,
        removed = summary.removed,
        skipped = summary.skipped,
        "mod sync complete"
    );
    Ok(summary)
}

fn is_stale(src: &Path, dst: &Path) -> bool {
    let (Ok(src_meta), Ok(dst_meta)) = (src.metadata(), dst.metadata()) else {
        return true;
    };
    if src_meta.len() != dst_meta.len() {
        return true;
    }
    match (src_meta.modified(), dst_meta.modified()) {
        (Ok(s), Ok(d)) => s > d,
        _ => true,
    }
}

/// Read the server's blacklist, one file name per line. Missing file means
/// an empty blacklist.
pub fn load_blacklist(server_dir: &Path) -> HashSet<String> {
    let path = server_dir.join(BLACKLIST_FILE_NAME);
    match std::fs::read_to_string(&path) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => HashSet::new(),
    }
}

/// Delete a mod jar from the server and blacklist it so the next sync does
/// not bring it back. The usual follow-up to a conflict report.
pub fn remove_mod(server_dir: &Path, file_name: &str) -> Result<()> {
    let jar = server_dir.join("mods").join(file_name);
    if jar.exists() {
        std::fs::remove_file(&jar)
            .with_context(|| format!("deleting {}", jar.display()))?;
    }
    add_to_blacklist(server_dir, file_name)?;
    info!(file = %file_name, "mod removed and blacklisted");
    Ok(())
}

/// Append a file name to the blacklist, creating it if needed. Duplicate
/// entries are not written twice.
pub fn add_to_blacklist(server_dir: &Path, file_name: &str) -> Result<()> {
    let mut entries = load_blacklist(server_dir);
    if !entries.insert(file_name.to_string()) {
        return Ok(());
    }
    let mut lines: Vec<&str> = entries.iter().map(String::as_str).collect();
    lines.sort_unstable();
    let path = server_dir.join(BLACKLIST_FILE_NAME);
    std::fs::write(&path, lines.join("\n") + "\n")
        .with_context(|| format!("writing {}", path.display()))
}

/// Drop the blacklist entirely, letting the next sync restore everything.
pub fn clear_blacklist(server_dir: &Path) -> Result<()> {
    let path = server_dir.join(BLACKLIST_FILE_NAME);
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, content: &[u8]) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn copies_new_and_removes_stray() {
        let source = tempfile::tempdir().unwrap();
        let server = tempfile::tempdir().unwrap();
        let mods = server.path().join("mods");
        std::fs::create_dir_all(&mods).unwrap();

        touch(source.path(), "a.jar", b"a");
        touch(source.path(), "b.jar", b"b");
        touch(&mods, "stray.jar", b"old");

        let summary = sync_mods(source.path(), server.path()).unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(summary.removed, 1);
        assert!(mods.join("a.jar").exists());
        assert!(!mods.join("stray.jar").exists());
    }

    #[test]
    fn updates_when_size_differs() {
        let source = tempfile::tempdir().unwrap();
        let server = tempfile::tempdir().unwrap();
        let mods = server.path().join("mods");
        std::fs::create_dir_all(&mods).unwrap();

        touch(source.path(), "a.jar", b"longer content");
        touch(&mods, "a.jar", b"short");

        let summary = sync_mods(source.path(), server.path()).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(
            std::fs::read(mods.join("a.jar")).unwrap(),
            b"longer content"
        );
    }

    #[test]
    fn blacklist_protects_removed_mod() {
        let source = tempfile::tempdir().unwrap();
        let server = tempfile::tempdir().unwrap();
        let mods = server.path().join("mods");
        std::fs::create_dir_all(&mods).unwrap();

        touch(source.path(), "broken.jar", b"jar");
        touch(&mods, "broken.jar", b"jar");

        remove_mod(server.path(), "broken.jar").unwrap();
        assert!(!mods.join("broken.jar").exists());

        let summary = sync_mods(source.path(), server.path()).unwrap();
        assert_eq!(summary.added, 0);
        assert_eq!(summary.skipped, 1);
        assert!(!mods.join("broken.jar").exists());
    }

    #[test]
    fn clearing_blacklist_restores_on_next_sync() {
        let source = tempfile::tempdir().unwrap();
        let server = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(server.path().join("mods")).unwrap();

        touch(source.path(), "broken.jar", b"jar");
        remove_mod(server.path(), "broken.jar").unwrap();
        clear_blacklist(server.path()).unwrap();

        let summary = sync_mods(source.path(), server.path()).unwrap();
        assert_eq!(summary.added, 1);
        assert!(server.path().join("mods/broken.jar").exists());
    }

    #[test]
    fn blacklist_entries_are_not_duplicated() {
        let server = tempfile::tempdir().unwrap();
        add_to_blacklist(server.path(), "a.jar").unwrap();
        add_to_blacklist(server.path(), "a.jar").unwrap();
        add_to_blacklist(server.path(), "b.jar").unwrap();
        let list = load_blacklist(server.path());
        assert_eq!(list.len(), 2);

        let text =
            std::fs::read_to_string(server.path().join(BLACKLIST_FILE_NAME)).unwrap();
        assert_eq!(text.matches("a.jar").count(), 1);
    }
}
