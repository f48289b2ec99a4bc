//! Lifecycle events and the fan-out bus subscribers share

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle status of a supervised server, derived from process existence
/// and log content - never polled, always pushed as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    /// No process exists for the profile
    Stopped,
    /// Process spawned, still booting
    Starting,
    /// Startup-complete marker observed in the log
    Running,
    /// Graceful shutdown command written to stdin
    Stopping,
    /// Process was forcibly terminated
    Killed,
}

impl ServerStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Killed => "Killed",
        }
    }
}

/// Everything the supervisor tells the outside world, tagged with the
/// profile name so overlapping servers stay distinguishable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    /// A raw line from the child's stdout or stderr, relayed verbatim
    Log {
        profile: String,
        line: String,
        error: bool,
    },
    /// Lifecycle transition for one profile
    Status {
        profile: String,
        status: ServerStatus,
    },
    /// A player name appeared in a join line
    PlayerJoined { profile: String, player: String },
    /// A player name appeared in a leave line
    PlayerLeft { profile: String, player: String },
    /// Accumulated incompatible mods, reported once per run after a fatal
    /// startup failure marker
    ModConflict {
        profile: String,
        mod_names: Vec<String>,
        file_names: Vec<String>,
    },
}

impl ServerEvent {
    pub fn profile(&self) -> &str {
        match self {
            Self::Log { profile, .. }
            | Self::Status { profile, .. }
            | Self::PlayerJoined { profile, .. }
            | Self::PlayerLeft { profile, .. }
            | Self::ModConflict { profile, .. } => profile,
        }
    }
}

/// Broadcast fan-out decoupled from any transport.
///
/// The supervisor publishes local events here; a connected client control
/// plane re-publishes replicated events onto the same bus so UI code never
/// cares which side of the link it runs on.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A bus with no subscribers silently drops it.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_delivers_to_all_subscribers() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(ServerEvent::Status {
            profile: "alpha".into(),
            status: ServerStatus::Starting,
        });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                ServerEvent::Status { profile, status } => {
                    assert_eq!(profile, "alpha");
                    assert_eq!(status, ServerStatus::Starting);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish(ServerEvent::PlayerJoined {
            profile: "alpha".into(),
            player: "Steve".into(),
        });
    }
}
