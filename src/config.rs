//! Runtime tunables for the supervisor and control plane

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default control-plane TCP port
pub const DEFAULT_CONTROL_PORT: u16 = 8181;

/// Fallback when a RAM string cannot be parsed, in MB
pub const DEFAULT_RAM_MB: u32 = 2048;

/// File that records mods intentionally removed from a server
pub const BLACKLIST_FILE_NAME: &str = "modsync_blacklist.txt";

/// Configuration shared by the supervisor and control plane.
///
/// Persisted profile data lives with the embedding front-end; this only
/// carries the knobs the core itself consults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// TCP port the control plane binds or dials when none is given
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Seconds between host telemetry samples pushed to clients
    #[serde(default = "default_telemetry_secs")]
    pub telemetry_interval_secs: u64,
    /// RAM assumed when a profile's max-RAM string is unparsable, in MB
    #[serde(default = "default_ram_mb")]
    pub default_ram_mb: u32,
    /// Capacity of the event fan-out channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_telemetry_secs() -> u64 {
    5
}

fn default_ram_mb() -> u32 {
    DEFAULT_RAM_MB
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            control_port: default_control_port(),
            telemetry_interval_secs: default_telemetry_secs(),
            default_ram_mb: default_ram_mb(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl FleetConfig {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs.max(1))
    }
}
