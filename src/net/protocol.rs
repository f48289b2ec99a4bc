//! Control-plane wire protocol
//!
//! Newline-delimited JSON, one tagged message per line. Request messages
//! flow client to host; ReceiveRemote* messages flow host to clients.

use serde::{Deserialize, Serialize};

use crate::core::events::ServerStatus;
use crate::core::launch::LaunchSpec;
use crate::core::monitor::SystemStats;

/// Full profile configuration pushed host to clients in one shot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub profiles: Vec<LaunchSpec>,
}

/// Every message that crosses the link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    // client -> host
    RequestStartServer { spec: Box<LaunchSpec> },
    RequestStopServer { profile: String },
    SendRemoteCommand { profile: String, command: String },
    RequestRemoteProperties { path: String },
    SaveRemoteProperties { path: String, props: Vec<(String, String)> },

    // host -> clients
    ReceiveRemoteLog { profile: String, line: String, error: bool },
    ReceiveRemoteStatus { profile: String, status: ServerStatus },
    ReceiveRemotePlayerJoined { profile: String, player: String },
    ReceiveRemotePlayerLeft { profile: String, player: String },
    ReceiveRemoteSystemStats { stats: SystemStats },
    RemotePropertiesSnapshot { path: String, props: Vec<(String, String)> },
    SyncConfigurationToAll { snapshot: ConfigSnapshot },
}

/// Serialize one message as a single JSON line, newline included.
pub fn encode(message: &Message) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one received line.
pub fn decode(line: &str) -> Result<Message, serde_json::Error> {
    serde_json::from_str(line.trim())
}
