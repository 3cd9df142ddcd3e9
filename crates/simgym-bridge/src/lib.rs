//! Environment bridge between a control loop and an external simulation
//!
//! This crate provides:
//! - `GymBridge`, the initialize/step/reset/close state machine
//! - Process supervisors that start the simulation and supply its channel
//! - `SimulationPeer`, the simulation half of the protocol

pub mod bridge;
pub mod lease;
pub mod peer;
#[cfg(unix)]
pub mod process;
pub mod supervisor;

pub use bridge::{BridgeConfig, GymBridge, Phase};
pub use lease::ResourceLease;
pub use peer::{SimCommand, SimulationPeer};
#[cfg(unix)]
pub use process::{CommandSupervisor, ProcessConfig};
pub use supervisor::{LocalSupervisor, ProcessSupervisor};
