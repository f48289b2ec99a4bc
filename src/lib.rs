//! mcfleet - Supervise multiple Minecraft server processes
//!
//! The crate is an embeddable core with two halves: a process supervisor
//! that owns the child server processes and infers their state from their
//! log streams, and a control plane that lets one peer host those servers
//! for remote observers. There is no CLI; a front-end drives the
//! [`Supervisor`](core::Supervisor) and [`ControlPlane`](net::ControlPlane)
//! directly.

#![allow(dead_code)] // Several API methods exist for embedding front-ends

pub mod affinity;
pub mod config;
pub mod core;
pub mod logging;
pub mod net;
pub mod platform;
pub mod props;

pub use crate::config::FleetConfig;
pub use crate::core::{
    EventBus, LaunchSpec, ServerEvent, ServerStatus, Supervisor, SupervisorHandle,
};
pub use crate::net::{ControlPlane, LinkState, PeerRole};

/// Library name constant
pub const APP_NAME: &str = "mcfleet";

/// Library version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
