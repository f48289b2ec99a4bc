//! Launch-line construction for supervised servers

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_RAM_MB;

/// Artifact markers standing in for a managed mod-loader install that uses
/// a generated argument file instead of a single runnable jar.
pub const FORGE_MARKER: &str = "FORGE_INSTALLED";
pub const NEOFORGE_MARKER: &str = "NEOFORGE_INSTALLED";

/// Everything needed to start one server profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Unique profile name, the supervisor's key
    pub profile: String,
    /// Server working directory
    pub dir: PathBuf,
    /// Jar file name, or a managed-loader marker
    pub artifact: String,
    /// Max heap, e.g. "4G", "4096", "512M"
    pub max_ram: String,
    /// Min heap, same grammar
    pub min_ram: String,
    /// Explicit java executable, or empty/"auto" for detection
    pub java_path: String,
    /// Extra JVM flags, whitespace separated
    pub extra_flags: String,
    /// Source mods folder synced into `<dir>/mods` before launch
    pub mods_source: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(profile: impl Into<String>, dir: impl Into<PathBuf>, artifact: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            dir: dir.into(),
            artifact: artifact.into(),
            max_ram: "4G".into(),
            min_ram: "2G".into(),
            java_path: String::new(),
            extra_flags: String::new(),
            mods_source: None,
        }
    }

    /// Whether the caller asked for automatic Java runtime detection.
    pub fn wants_auto_java(&self) -> bool {
        let j = self.java_path.trim();
        j.is_empty() || j.eq_ignore_ascii_case("auto") || j == "Default (java)"
    }

    /// Whether the artifact is a managed-loader marker rather than a jar.
    pub fn is_managed_loader(&self) -> bool {
        self.artifact == FORGE_MARKER || self.artifact == NEOFORGE_MARKER
    }
}

/// Parse a max-RAM string into MB.
///
/// Grammar `^\d+(\.\d+)?[GgMm]?$`: a `G` suffix multiplies by 1024, `M` or
/// no suffix means the number is already MB. Anything unparsable falls
/// back to [`DEFAULT_RAM_MB`].
pub fn parse_ram_mb(text: &str) -> u32 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DEFAULT_RAM_MB;
    }

    let (number, multiplier) = match trimmed.chars().last() {
        Some('G') | Some('g') => (&trimmed[..trimmed.len() - 1], 1024.0),
        Some('M') | Some('m') => (&trimmed[..trimmed.len() - 1], 1.0),
        _ => (trimmed, 1.0),
    };

    match number.parse::<f64>() {
        Ok(value) if value > 0.0 => (value * multiplier).round() as u32,
        _ => DEFAULT_RAM_MB,
    }
}

/// Return the trimmed RAM string if it fits the grammar, else the
/// fallback rendered as `<mb>M`. Keeps an unparsable profile value from
/// ever reaching the JVM command line.
pub fn normalize_ram(text: &str, fallback_mb: u32) -> String {
    let trimmed = text.trim();
    let number = match trimmed.chars().last() {
        Some('G') | Some('g') | Some('M') | Some('m') => &trimmed[..trimmed.len() - 1],
        _ => trimmed,
    };
    match number.parse::<f64>() {
        Ok(value) if value > 0.0 => trimmed.to_string(),
        _ => format!("{fallback_mb}M"),
    }
}

/// Build the argument vector passed to the resolved Java executable:
/// `-Xmx<max> -Xms<min> <extraFlags> -jar "<jar>" nogui`, or the
/// `@<argfile>` indirection for managed-loader installs.
pub fn build_launch_args(spec: &LaunchSpec) -> Result<Vec<String>> {
    let mut args = vec![
        format!("-Xmx{}", spec.max_ram.trim()),
        format!("-Xms{}", spec.min_ram.trim()),
    ];
    args.extend(spec.extra_flags.split_whitespace().map(str::to_string));

    if spec.is_managed_loader() {
        if let Some(argfile) = find_loader_argfile(&spec.dir) {
            args.push(format!("@{}", argfile.display()));
        } else if let Some(jar) = find_loader_jar(&spec.dir) {
            args.push("-jar".into());
            args.push(jar);
        } else {
            bail!(
                "no loader argument file or jar found under {}",
                spec.dir.display()
            );
        }
    } else {
        args.push("-jar".into());
        args.push(spec.artifact.clone());
    }

    args.push("nogui".into());
    Ok(args)
}

/// Generated argument file name, fixed per OS family.
#[cfg(windows)]
const ARGFILE_NAME: &str = "win_args.txt";
#[cfg(not(windows))]
const ARGFILE_NAME: &str = "unix_args.txt";

/// Search the install tree for the loader's generated argument file.
/// Modern Forge/NeoForge put it a few levels down in `libraries/`.
pub fn find_loader_argfile(dir: &Path) -> Option<PathBuf> {
    find_file_named(&dir.join("libraries"), ARGFILE_NAME, 8)
}

fn find_file_named(dir: &Path, name: &str, depth: usize) -> Option<PathBuf> {
    if depth == 0 {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && entry.file_name() == name {
            return Some(path);
        }
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs
        .into_iter()
        .find_map(|sub| find_file_named(&sub, name, depth - 1))
}

/// Fallback for older managed installs: a loader jar in the server root
/// whose name does not contain "installer".
pub fn find_loader_jar(dir: &Path) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let lower = name.to_lowercase();
        if lower.ends_with(".jar")
            && (lower.contains("forge") || lower.contains("neoforge"))
            && !lower.contains("installer")
        {
            return Some(name);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_grammar() {
        assert_eq!(parse_ram_mb("4G"), 4096);
        assert_eq!(parse_ram_mb("512M"), 512);
        assert_eq!(parse_ram_mb("2048"), 2048);
        assert_eq!(parse_ram_mb("banana"), DEFAULT_RAM_MB);
        assert_eq!(parse_ram_mb(""), DEFAULT_RAM_MB);
        assert_eq!(parse_ram_mb("1.5g"), 1536);
        assert_eq!(parse_ram_mb("0"), DEFAULT_RAM_MB);
    }

    #[test]
    fn ram_normalization() {
        assert_eq!(normalize_ram("4G", 2048), "4G");
        assert_eq!(normalize_ram(" 512M ", 2048), "512M");
        assert_eq!(normalize_ram("banana", 2048), "2048M");
        assert_eq!(normalize_ram("", 2048), "2048M");
        assert_eq!(normalize_ram("-1G", 2048), "2048M");
    }

    #[test]
    fn plain_jar_launch_line() {
        let mut spec = LaunchSpec::new("alpha", "/srv/alpha", "server.jar");
        spec.extra_flags = "-XX:+UseG1GC".into();
        let args = build_launch_args(&spec).unwrap();
        assert_eq!(
            args,
            vec!["-Xmx4G", "-Xms2G", "-XX:+UseG1GC", "-jar", "server.jar", "nogui"]
        );
    }

    #[test]
    fn managed_loader_uses_argfile_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp
            .path()
            .join("libraries/net/minecraftforge/forge/1.20.1-47.2.0");
        std::fs::create_dir_all(&nested).unwrap();
        let argfile = nested.join(super::ARGFILE_NAME);
        std::fs::write(&argfile, b"-p libraries").unwrap();

        let mut spec = LaunchSpec::new("alpha", tmp.path(), FORGE_MARKER);
        spec.max_ram = "2G".into();
        let args = build_launch_args(&spec).unwrap();
        assert!(args.iter().any(|a| a == &format!("@{}", argfile.display())));
        assert_eq!(args.last().unwrap(), "nogui");
    }

    #[test]
    fn managed_loader_falls_back_to_non_installer_jar() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("forge-1.16.5-installer.jar"), b"x").unwrap();
        std::fs::write(tmp.path().join("forge-1.16.5.jar"), b"x").unwrap();

        let spec = LaunchSpec::new("alpha", tmp.path(), FORGE_MARKER);
        let args = build_launch_args(&spec).unwrap();
        let jar_pos = args.iter().position(|a| a == "-jar").unwrap();
        assert_eq!(args[jar_pos + 1], "forge-1.16.5.jar");
    }

    #[test]
    fn managed_loader_with_empty_tree_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = LaunchSpec::new("alpha", tmp.path(), NEOFORGE_MARKER);
        assert!(build_launch_args(&spec).is_err());
    }

    #[test]
    fn auto_java_detection_spellings() {
        let mut spec = LaunchSpec::new("a", "/srv", "server.jar");
        for text in ["", "auto", "AUTO", "Default (java)"] {
            spec.java_path = text.into();
            assert!(spec.wants_auto_java(), "{:?} should mean auto", text);
        }
        spec.java_path = "/usr/bin/java".into();
        assert!(!spec.wants_auto_java());
    }
}
