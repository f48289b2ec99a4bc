//! Host/client control plane

pub mod control;
pub mod protocol;

pub use control::{ControlError, ControlPlane, LinkState, PeerRole};
pub use protocol::{ConfigSnapshot, Message};
