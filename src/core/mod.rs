//! Core module - supervisor, log classification, launch plumbing

pub mod classifier;
pub mod events;
pub mod java;
pub mod launch;
pub mod modsync;
pub mod monitor;
pub mod supervisor;

pub use events::{EventBus, ServerEvent, ServerStatus};
pub use launch::LaunchSpec;
pub use monitor::{SystemSampler, SystemStats};
pub use supervisor::{Supervisor, SupervisorError, SupervisorHandle};
