//! Log classification - the only way the supervisor learns what a server
//! is doing.
//!
//! The patterns are heuristic substring scans over vanilla/Forge/NeoForge
//! console output. They are a compatibility baseline, not a grammar; the
//! matchers stay ordered and deduplicated rather than generalized.

use std::path::Path;

use tracing::debug;

/// Marker a server prints when it has finished booting
const STARTUP_COMPLETE: &str = "Done (";
/// Join/leave markers, with the player name extracted after the INFO prefix
const PLAYER_JOINED: &str = "joined the game";
const PLAYER_LEFT: &str = "left the game";
const INFO_PREFIX: &str = "INFO]: ";

/// What a single log line told us, if anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    PlayerJoined(String),
    PlayerLeft(String),
    StartupComplete,
    Nothing,
}

/// Classify a console line for lifecycle and player traffic.
pub fn classify(line: &str) -> Classified {
    if line.contains(PLAYER_JOINED) {
        if let Some(name) = extract_player_name(line) {
            return Classified::PlayerJoined(name);
        }
    } else if line.contains(PLAYER_LEFT) {
        if let Some(name) = extract_player_name(line) {
            return Classified::PlayerLeft(name);
        }
    } else if line.contains(STARTUP_COMPLETE) {
        return Classified::StartupComplete;
    }
    Classified::Nothing
}

/// Pull the player name out of a `"[..INFO]: Steve joined the game"` line.
fn extract_player_name(line: &str) -> Option<String> {
    let idx = line.find(INFO_PREFIX)?;
    let rest = &line[idx + INFO_PREFIX.len()..];
    let name = rest.split_whitespace().next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Loader messages that name a mod which cannot run on a dedicated server.
/// Checked in order; the first match wins for a line.
const FAILED_TO_LOAD: &str = "has failed to load correctly";
const FAILED_INSTANCE: &str = "Failed to create mod instance. ModID: ";
const SERVER_INCOMPATIBLE: &str = "is not compatible with dedicated servers";
const INVALID_DIST: &str = "invalid dist DEDICATED_SERVER";

/// Markers that the startup attempt is dead; pending conflicts get
/// reported when one of these appears.
const FATAL_MARKERS: &[&str] = &[
    "Failed to start the minecraft server",
    "Incompatible mod set!",
    "Error during pre-loading phase",
    "LoadingFailedException",
    "Crash report saved",
];

#[derive(Debug, Clone)]
struct PendingConflict {
    id: String,
    file_name: String,
}

/// Per-run accumulator for mod ids implicated in a startup crash.
///
/// Ids are deduplicated in first-seen order and resolved to a jar in the
/// server's mods directory by name containment. One report per run: the
/// first fatal marker with a non-empty pending list flushes it, later
/// fatal markers stay silent.
#[derive(Debug, Default)]
pub struct ConflictTracker {
    pending: Vec<PendingConflict>,
    reported: bool,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything from the previous run.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.reported = false;
    }

    /// Feed one console line. Returns the accumulated conflict
    /// `(mod_names, file_names)` exactly once per run, when a fatal
    /// startup marker lands on a non-empty pending list.
    pub fn observe(&mut self, line: &str, mods_dir: &Path) -> Option<(Vec<String>, Vec<String>)> {
        if let Some(id) = match_conflict_id(line) {
            self.push(id, mods_dir);
            return None;
        }

        if FATAL_MARKERS.iter().any(|m| line.contains(m)) && !self.pending.is_empty() {
            if self.reported {
                return None;
            }
            self.reported = true;
            let names = self.pending.iter().map(|p| p.id.clone()).collect();
            let files = self.pending.iter().map(|p| p.file_name.clone()).collect();
            self.pending.clear();
            return Some((names, files));
        }

        None
    }

    fn push(&mut self, id: String, mods_dir: &Path) {
        if self.reported || self.pending.iter().any(|p| p.id == id) {
            return;
        }
        let file_name = resolve_mod_file(mods_dir, &id).unwrap_or_default();
        debug!(mod_id = %id, file = %file_name, "pending mod conflict");
        self.pending.push(PendingConflict { id, file_name });
    }
}

/// Run the ordered matcher set against one line; first match wins.
fn match_conflict_id(line: &str) -> Option<String> {
    // (a) "Mod Display Name (modid) has failed to load correctly"
    if let Some(pos) = line.find(FAILED_TO_LOAD) {
        if let Some(id) = parenthesized_id(&line[..pos]) {
            return Some(id);
        }
    }
    // (b) "Failed to create mod instance. ModID: modid"
    if let Some(pos) = line.find(FAILED_INSTANCE) {
        let rest = &line[pos + FAILED_INSTANCE.len()..];
        let id: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if !id.is_empty() {
            return Some(id);
        }
    }
    // (c) "Mod Display Name (modid) is not compatible with dedicated servers"
    if let Some(pos) = line.find(SERVER_INCOMPATIBLE) {
        if let Some(id) = parenthesized_id(&line[..pos]) {
            return Some(id);
        }
    }
    // (d) distribution error carrying a mod-jar path
    if line.contains(INVALID_DIST) {
        if let Some(jar) = line
            .split_whitespace()
            .find(|tok| tok.ends_with(".jar"))
            .map(|tok| tok.trim_matches(|c| c == '"' || c == '\'' || c == ','))
        {
            let stem = Path::new(jar)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(jar);
            return Some(stem.to_string());
        }
    }
    None
}

/// Extract `id` from trailing `"... (id)"` text.
fn parenthesized_id(text: &str) -> Option<String> {
    let open = text.rfind('(')?;
    let close = text[open..].find(')')? + open;
    let id = text[open + 1..close].trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Find a jar in the mods directory whose name contains the mod id.
fn resolve_mod_file(mods_dir: &Path, id: &str) -> Option<String> {
    let needle = id.to_lowercase();
    let entries = std::fs::read_dir(mods_dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.to_lowercase().ends_with(".jar") && name.to_lowercase().contains(&needle) {
            return Some(name);
        }
    }
    None
}
