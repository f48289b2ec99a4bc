//! Java runtime discovery and required-version inference
//!
//! Every probe here is best-effort: a failed scan or unreadable jar only
//! degrades the heuristic and the launch falls back to the bare `java`
//! command.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

/// One installed Java runtime found on the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaInstall {
    pub major: u32,
    pub path: PathBuf,
}

#[cfg(windows)]
const JAVA_EXE: &str = "java.exe";
#[cfg(not(windows))]
const JAVA_EXE: &str = "java";

/// Directories commonly holding JDK installs, checked one level deep.
fn common_install_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(data) = dirs::data_dir() {
        roots.push(data.join("jdk"));
    }
    #[cfg(windows)]
    {
        for name in [
            "C:\\Program Files\\Java",
            "C:\\Program Files\\Eclipse Adoptium",
            "C:\\Program Files\\BellSoft",
            "C:\\Program Files\\Zulu",
            "C:\\Program Files\\Microsoft",
            "C:\\Program Files (x86)\\Java",
        ] {
            roots.push(PathBuf::from(name));
        }
        if let Some(local) = dirs::data_local_dir() {
            roots.push(local.join("Programs").join("Adoptium"));
            roots.push(local.join("Programs").join("Java"));
        }
    }
    #[cfg(not(windows))]
    {
        for name in [
            "/usr/lib/jvm",
            "/usr/java",
            "/opt/java",
            "/Library/Java/JavaVirtualMachines",
        ] {
            roots.push(PathBuf::from(name));
        }
    }
    roots
}

/// Scan the machine for installed Java runtimes, newest first.
pub fn scan_installs() -> Vec<JavaInstall> {
    let mut found: Vec<JavaInstall> = Vec::new();
    let mut push = |major: u32, path: PathBuf| {
        if major > 0 && !found.iter().any(|j| j.path == path) {
            found.push(JavaInstall { major, path });
        }
    };

    for root in common_install_roots() {
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            if let Some(exe) = java_exe_in(&dir) {
                if let Some(major) = major_from_text(&dir.to_string_lossy()) {
                    push(major, exe);
                }
            }
        }
    }

    #[cfg(windows)]
    for home in crate::platform::windows::registry_java_homes() {
        if let Some(exe) = java_exe_in(&home) {
            if let Some(major) = major_from_text(&home.to_string_lossy()) {
                push(major, exe);
            }
        }
    }

    // JAVA_HOME and PATH entries round out the scan.
    if let Ok(home) = std::env::var("JAVA_HOME") {
        let home = PathBuf::from(home);
        if let Some(exe) = java_exe_in(&home) {
            if let Some(major) = major_from_text(&home.to_string_lossy()) {
                push(major, exe);
            }
        }
    }
    if let Ok(path_env) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_env) {
            let exe = dir.join(JAVA_EXE);
            if exe.is_file() {
                if let Some(major) = major_from_text(&dir.to_string_lossy()) {
                    push(major, exe);
                }
            }
        }
    }

    found.sort_by(|a, b| b.major.cmp(&a.major));
    debug!(count = found.len(), "java scan complete");
    found
}

/// Locate `bin/java` (or a bare `java`) under an install directory.
fn java_exe_in(dir: &Path) -> Option<PathBuf> {
    // macOS bundles put the JDK under Contents/Home.
    for candidate in [
        dir.join("bin").join(JAVA_EXE),
        dir.join("Contents/Home/bin").join(JAVA_EXE),
        dir.join(JAVA_EXE),
    ] {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Pick the executable for a required major version: exact match first,
/// else the lowest strictly-greater install, else the bare command name.
pub fn best_java(required: u32) -> String {
    let installs = scan_installs();
    best_java_from(&installs, required)
}

fn best_java_from(installs: &[JavaInstall], required: u32) -> String {
    if let Some(exact) = installs.iter().find(|j| j.major == required) {
        return exact.path.to_string_lossy().into_owned();
    }
    if let Some(higher) = installs
        .iter()
        .filter(|j| j.major > required)
        .min_by_key(|j| j.major)
    {
        return higher.path.to_string_lossy().into_owned();
    }
    "java".to_string()
}

/// Infer the Java major version a server jar needs.
///
/// Reads embedded loader metadata when present (`fabric.mod.json`,
/// `version.json`, `minecraft_version_*` entries), else infers from a
/// Minecraft version string in the file name.
pub fn detect_required_major(jar: &Path) -> Option<u32> {
    if let Some(major) = inspect_jar(jar) {
        info!(jar = %jar.display(), major, "detected java requirement");
        return Some(major);
    }
    let name = jar.file_name()?.to_string_lossy();
    find_mc_version(&name).map(|v| java_for_mc_version(&v))
}

fn inspect_jar(jar: &Path) -> Option<u32> {
    let file = std::fs::File::open(jar).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;

    if let Some(major) = read_fabric_metadata(&mut archive) {
        return Some(major);
    }

    if let Ok(mut entry) = archive.by_name("version.json") {
        let mut text = String::new();
        if entry.read_to_string(&mut text).is_ok() {
            if let Ok(json) = serde_json::from_str::<Value>(&text) {
                if let Some(id) = json.get("id").and_then(Value::as_str) {
                    return Some(java_for_mc_version(id));
                }
            }
        }
    }

    // Older jars carry a bare minecraft_version_<v> marker entry.
    let marker = (0..archive.len()).find_map(|i| {
        let name = archive.name_for_index(i)?;
        let file_name = name.rsplit('/').next()?;
        file_name
            .strip_prefix("minecraft_version_")
            .map(str::to_string)
    });
    marker
        .and_then(|v| find_mc_version(&v))
        .map(|v| java_for_mc_version(&v))
}

fn read_fabric_metadata(archive: &mut zip::ZipArchive<std::fs::File>) -> Option<u32> {
    let mut text = String::new();
    archive
        .by_name("fabric.mod.json")
        .ok()?
        .read_to_string(&mut text)
        .ok()?;
    let json: Value = serde_json::from_str(&text).ok()?;
    let depends = json.get("depends")?;

    if let Some(java) = depends.get("java").and_then(Value::as_str) {
        if let Some(major) = first_integer(java) {
            return Some(major);
        }
    }
    if let Some(mc) = depends.get("minecraft").and_then(Value::as_str) {
        if let Some(version) = find_mc_version(mc) {
            return Some(java_for_mc_version(&version));
        }
    }
    None
}

/// Map a Minecraft version string to its required Java major version.
pub fn java_for_mc_version(version: &str) -> u32 {
    let Some(clean) = find_mc_version(version) else {
        return 8;
    };
    let mut parts = clean.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);

    if major > 1 {
        return 21;
    }
    if major == 1 {
        if minor >= 21 {
            return 21;
        }
        if minor == 20 {
            // 1.20.5+ moved to Java 21
            return if patch >= 5 { 21 } else { 17 };
        }
        if minor >= 18 {
            return 17;
        }
        if minor == 17 {
            return 16;
        }
    }
    8
}

/// Find the first `a.b` or `a.b.c` version substring in arbitrary text,
/// e.g. `">=1.20.1"` -> `"1.20.1"`.
fn find_mc_version(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            let mut dots = 0;
            let mut end = i;
            while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
                if bytes[end] == b'.' {
                    // Trailing dot is not part of a version.
                    if end + 1 >= bytes.len() || !bytes[end + 1].is_ascii_digit() {
                        break;
                    }
                    dots += 1;
                    if dots > 2 {
                        break;
                    }
                }
                end += 1;
            }
            if dots >= 1 {
                return Some(text[start..end].to_string());
            }
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }
    None
}

fn first_integer(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Majors outside this range are vendor/arch noise (`amd64`, build ids),
/// not Java versions.
const MAJOR_RANGE: std::ops::RangeInclusive<u32> = 8..=30;

/// Guess a Java major version from an install path or directory name,
/// e.g. `jdk-17.0.2`, `java-21-openjdk-amd64`, `zulu8`.
pub fn major_from_text(text: &str) -> Option<u32> {
    let lower = text.to_lowercase();
    // "java-" before bare "jdk": Debian-style names like
    // "java-21-openjdk-amd64" contain "jdk-" inside "openjdk-", which
    // would otherwise read the 64 out of "amd64".
    for marker in ["java-", "jdk-", "jre-", "version-", "jdk", "jre"] {
        let mut offset = 0;
        while let Some(pos) = lower[offset..].find(marker) {
            let at = offset + pos;
            offset = at + marker.len();
            // Marker must start the name or a segment, never sit inside a
            // longer word like "openjdk".
            if at > 0 && lower.as_bytes()[at - 1].is_ascii_alphanumeric() {
                continue;
            }
            let rest = &lower[at + marker.len()..];
            let Some(value) = first_integer(rest) else {
                continue;
            };
            // Legacy "1.8" style names
            if value == 1 {
                if let Some(sub) = rest.strip_prefix("1.").and_then(first_integer) {
                    if MAJOR_RANGE.contains(&sub) {
                        return Some(sub);
                    }
                }
                continue;
            }
            if MAJOR_RANGE.contains(&value) {
                return Some(value);
            }
        }
    }

    // No marker: take any number in a plausible modern range first.
    let numbers: Vec<u32> = all_integers(&lower);
    numbers
        .iter()
        .copied()
        .find(|v| (17..=30).contains(v))
        .or_else(|| numbers.iter().copied().find(|v| (8..=16).contains(v)))
}

fn all_integers(text: &str) -> Vec<u32> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            if let Ok(v) = current.parse() {
                out.push(v);
            }
            current.clear();
        }
    }
    if let Ok(v) = current.parse() {
        out.push(v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mc_version_to_java_table() {
        assert_eq!(java_for_mc_version("1.21.1"), 21);
        assert_eq!(java_for_mc_version("1.20.5"), 21);
        assert_eq!(java_for_mc_version("1.20.1"), 17);
        assert_eq!(java_for_mc_version("1.18.2"), 17);
        assert_eq!(java_for_mc_version("1.17"), 16);
        assert_eq!(java_for_mc_version("1.16.5"), 8);
        assert_eq!(java_for_mc_version("1.7.10"), 8);
        assert_eq!(java_for_mc_version(">=1.20.5"), 21);
        assert_eq!(java_for_mc_version("garbage"), 8);
    }

    #[test]
    fn version_substring_extraction() {
        assert_eq!(find_mc_version("server-1.20.1.jar"), Some("1.20.1".into()));
        assert_eq!(find_mc_version(">=1.18"), Some("1.18".into()));
        assert_eq!(find_mc_version("no version here"), None);
        assert_eq!(find_mc_version("fabric-server-mc.1.21-loader.0.15.11"), Some("1.21".into()));
    }

    #[test]
    fn install_dir_version_guess() {
        assert_eq!(major_from_text("jdk-17.0.2"), Some(17));
        assert_eq!(major_from_text("java-21-openjdk-amd64"), Some(21));
        assert_eq!(major_from_text("jdk1.8.0_311"), Some(8));
        assert_eq!(major_from_text("zulu21.30.15"), Some(21));
        assert_eq!(major_from_text("no-digits"), None);
    }

    // Debian/Ubuntu layouts must discriminate by the java-NN segment and
    // never read the arch suffix as a version.
    #[test]
    fn debian_install_names_keep_their_majors_distinct() {
        assert_eq!(major_from_text("/usr/lib/jvm/java-8-openjdk-amd64"), Some(8));
        assert_eq!(
            major_from_text("/usr/lib/jvm/java-17-openjdk-amd64"),
            Some(17)
        );
        assert_eq!(
            major_from_text("/usr/lib/jvm/java-1.8.0-openjdk-amd64"),
            Some(8)
        );
        // Implausible major plus arch noise resolves to nothing rather
        // than to 64.
        assert_eq!(major_from_text("java-99-openjdk-amd64"), None);
    }

    #[test]
    fn best_java_prefers_exact_then_lowest_greater() {
        let installs = vec![
            JavaInstall { major: 21, path: "/j/21/bin/java".into() },
            JavaInstall { major: 17, path: "/j/17/bin/java".into() },
            JavaInstall { major: 8, path: "/j/8/bin/java".into() },
        ];
        assert_eq!(best_java_from(&installs, 17), "/j/17/bin/java");
        assert_eq!(best_java_from(&installs, 18), "/j/21/bin/java");
        assert_eq!(best_java_from(&installs, 22), "java");
        assert_eq!(best_java_from(&[], 17), "java");
    }

    #[test]
    fn filename_inference_for_unreadable_jar() {
        assert_eq!(
            detect_required_major(Path::new("/nope/paper-1.20.1.jar")),
            Some(17)
        );
        assert_eq!(detect_required_major(Path::new("/nope/server.jar")), None);
    }
}
